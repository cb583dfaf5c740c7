//! Stdout / file destination
//!
//! The in-tree destination: one JSON line per publish, prefixed with the
//! queue name. Message-bus destinations implement the same trait out of
//! tree.

use std::io::Write;
use std::sync::Mutex;

use super::Destination;

pub struct StdoutDestination {
    name: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutDestination {
    pub fn stdout() -> Self {
        StdoutDestination {
            name: "stdout".to_string(),
            out: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    pub fn file(path: &str) -> anyhow::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(StdoutDestination {
            name: format!("file:{path}"),
            out: Mutex::new(Box::new(file)),
        })
    }

    #[cfg(test)]
    pub fn sink_to(buffer: std::sync::Arc<Mutex<Vec<u8>>>) -> Self {
        struct Shared(std::sync::Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        StdoutDestination {
            name: "test".to_string(),
            out: Mutex::new(Box::new(Shared(buffer))),
        }
    }
}

impl Destination for StdoutDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, queue: &str, body: &[u8]) -> anyhow::Result<()> {
        let mut out = self.out.lock().expect("writer lock");
        out.write_all(queue.as_bytes())?;
        out.write_all(b": ")?;
        out.write_all(body)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
