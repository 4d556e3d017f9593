// src/host/writer.rs
//! XML event stream on stdout. The `<stream>` header goes out with the first
//! event and `</stream>` on [`XmlEventWriter::finish`]; each event is flushed
//! as soon as it is written so the host can index it immediately.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use quick_xml::escape::escape;

use crate::error::{IngestError, Result};
use crate::ingest::types::{Event, EventSink};

struct WriterState<W> {
    out: W,
    header_written: bool,
    finished: bool,
}

pub struct XmlEventWriter<W: Write + Send> {
    state: Mutex<WriterState<W>>,
}

impl<W: Write + Send> XmlEventWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(WriterState {
                out,
                header_written: false,
                finished: false,
            }),
        }
    }

    /// Close the stream. Idempotent; writes nothing if no event was emitted.
    pub fn finish(&self) -> io::Result<()> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.finished {
            return Ok(());
        }
        st.finished = true;
        if st.header_written {
            st.out.write_all(b"</stream>\n")?;
            st.out.flush()?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn write_event(&self, event: &Event) -> io::Result<()> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "event stream already finished",
            ));
        }
        if !st.header_written {
            st.out.write_all(b"<stream>\n")?;
            st.header_written = true;
        }
        st.out.write_all(render_event(event).as_bytes())?;
        st.out.flush()
    }
}

pub fn render_event(event: &Event) -> String {
    format!(
        "<event stanza=\"{}\"><time>{}</time><sourcetype>{}</sourcetype><data>{}</data></event>\n",
        escape(event.stanza.as_str()),
        event.epoch_seconds(),
        escape(event.sourcetype),
        escape(event.data.as_str()),
    )
}

impl<W: Write + Send> EventSink for XmlEventWriter<W> {
    fn emit(&self, event: &Event) -> Result<()> {
        self.write_event(event).map_err(IngestError::Emit)
    }
}
