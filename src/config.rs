//! Embedder-facing configuration and transport selection.

use std::io::{self, Read, Write};

/// Tuning knobs for the runtime. The defaults are fine for almost every
/// plugin; the buffers trade memory for latency smoothing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Depth of the prebuffer in front of each input stream consumer.
    pub list_buffer: usize,
    /// Upper bound for byte-stream coalescing buffers.
    pub raw_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            list_buffer: 16,
            raw_buffer: 16 * 1024,
        }
    }
}

/// The byte pipe the session runs over. The runtime reads engine frames
/// from `reader` and writes its own through `writer`; it does no argv
/// parsing of its own; the embedder picks the transport.
pub struct IoPair {
    pub(crate) reader: Box<dyn Read + Send>,
    pub(crate) writer: Box<dyn Write + Send>,
}

impl IoPair {
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> IoPair {
        IoPair {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// The default transport: inherited stdio.
    pub fn stdio() -> IoPair {
        IoPair::new(io::stdin(), io::stdout())
    }

    /// Connect to the engine's Unix domain socket. The plugin connects
    /// twice in strict order: first the engine-to-plugin stream, then the
    /// plugin-to-engine stream.
    #[cfg(unix)]
    pub fn local_socket(path: impl AsRef<std::path::Path>) -> io::Result<IoPair> {
        use std::os::unix::net::UnixStream;
        let path = path.as_ref();
        let input = UnixStream::connect(path)?;
        let output = UnixStream::connect(path)?;
        Ok(IoPair::new(input, output))
    }

    /// Pick the transport from the plugin's command line: a leading
    /// `--local-socket <path>` pair selects the socket transport,
    /// anything else falls back to stdio.
    pub fn from_args<I, S>(args: I) -> io::Result<IoPair>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_owned()).collect();
        if args.len() > 2 && args[1] == "--local-socket" {
            #[cfg(unix)]
            return IoPair::local_socket(&args[2]);
            #[cfg(not(unix))]
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "local socket transport is not supported on this platform",
            ));
        }
        Ok(IoPair::stdio())
    }

    /// Tee every byte read from the engine into `sniffer`. The sniffer
    /// must not block.
    pub fn sniff_in(self, sniffer: impl Write + Send + 'static) -> IoPair {
        IoPair {
            reader: Box::new(TeeReader {
                inner: self.reader,
                sniffer: Box::new(sniffer),
            }),
            writer: self.writer,
        }
    }

    /// Tee every byte written to the engine into `sniffer`. The sniffer
    /// must not block.
    pub fn sniff_out(self, sniffer: impl Write + Send + 'static) -> IoPair {
        IoPair {
            reader: self.reader,
            writer: Box::new(TeeWriter {
                inner: self.writer,
                sniffer: Box::new(sniffer),
            }),
        }
    }
}

struct TeeReader {
    inner: Box<dyn Read + Send>,
    sniffer: Box<dyn Write + Send>,
}

impl Read for TeeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            let _ = self.sniffer.write_all(&buf[..n]);
        }
        Ok(n)
    }
}

struct TeeWriter {
    inner: Box<dyn Write + Send>,
    sniffer: Box<dyn Write + Send>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            let _ = self.sniffer.write_all(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
