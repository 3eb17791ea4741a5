//! Handler that writes every record as `name: value` lines

use std::io::{self, Write};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{ExportError, Result};
use crate::export::ExportHandler;
use crate::model::{FieldValue, Record, RunMetadata};

/// Writes records to a writer, one `name: value` line per field
///
/// Streamed long text is read in full and printed inline. Not safe for
/// concurrent delivery, so records are never interleaved.
pub struct PrintHandler<W: Write + Send> {
    out: Mutex<W>,
    field_names: Mutex<Vec<String>>,
}

impl PrintHandler<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> PrintHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            field_names: Mutex::new(Vec::new()),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send + 'static> ExportHandler for PrintHandler<W> {
    async fn on_before_run(&self, metadata: &RunMetadata) -> Result<()> {
        *self.field_names.lock().await = metadata.fields.iter().map(|f| f.name.clone()).collect();
        let mut out = self.out.lock().await;
        writeln!(out, "run {} ({} records)", metadata.run_id, metadata.record_count)?;
        Ok(())
    }

    async fn on_record(&self, record: &mut Record) -> Result<bool> {
        let names = self.field_names.lock().await.clone();

        let mut lines = Vec::with_capacity(record.values.len());
        for (index, value) in record.values.iter_mut().enumerate() {
            let name = names.get(index).map(String::as_str).unwrap_or("?");
            let text = match value {
                FieldValue::Stream(stream) => stream.read_to_string().await?,
                other => other.to_string(),
            };
            lines.push(format!("{name}: {text}"));
        }

        let mut out = self.out.lock().await;
        writeln!(out, "--- {} ---", record.artifact_id)?;
        for line in lines {
            writeln!(out, "{line}")?;
        }
        Ok(true)
    }

    async fn on_error(&self, message: &str, error: &ExportError) {
        let mut out = self.out.lock().await;
        let _ = writeln!(out, "error: {message}: {error}");
    }

    async fn on_after_run(&self, completed: bool) {
        let mut out = self.out.lock().await;
        let _ = writeln!(out, "done (completed: {completed})");
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExportInitialization, FieldMetadata, FieldStream, FieldType};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_prints_fields_and_streams() {
        let handler = PrintHandler::new(Vec::new());
        let metadata = RunMetadata::from_initialization(ExportInitialization {
            run_id: Uuid::nil(),
            record_count: 1,
            field_data: vec![
                FieldMetadata {
                    name: "Control Number".into(),
                    field_type: FieldType::FixedLengthText,
                },
                FieldMetadata {
                    name: "Extracted Text".into(),
                    field_type: FieldType::LongText,
                },
            ],
        });
        handler.on_before_run(&metadata).await.unwrap();

        let mut record = Record::new(
            7,
            vec![
                FieldValue::Text("DOC7".into()),
                FieldValue::Stream(FieldStream::from_bytes(7, "Extracted Text", b"hello".to_vec())),
            ],
        );
        assert!(handler.on_record(&mut record).await.unwrap());
        handler.on_after_run(true).await;

        let output = String::from_utf8(handler.into_inner()).unwrap();
        assert!(output.contains("--- 7 ---\nControl Number: DOC7\nExtracted Text: hello\n"));
        assert!(output.ends_with("done (completed: true)\n"));
    }
}
