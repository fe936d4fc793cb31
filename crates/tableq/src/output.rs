//! Output formatting for the tableq CLI.
//!
//! [`OutputWriter`] renders command results either as a `tabled` table or as
//! pretty-printed JSON, depending on `--format`.

use serde::Serialize;
use tabled::{Table, Tabled};

pub enum OutputWriter {
    /// Human-readable table
    Table(TableOutputWriter),
    /// Pretty-printed JSON
    Json(JsonOutputWriter),
}

impl OutputWriter {
    pub fn from_format(format: &str) -> Self {
        match format.to_lowercase().as_str() {
            "json" => OutputWriter::Json(JsonOutputWriter),
            _ => OutputWriter::Table(TableOutputWriter),
        }
    }

    /// Write a list of items using the configured output format.
    pub fn write_list<T: Serialize + Tabled>(
        &self,
        items: &[T],
        out: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match self {
            OutputWriter::Table(writer) => writer.write_list(items, out),
            OutputWriter::Json(writer) => writer.write_list(items, out),
        }
    }

    /// Write a single item using the configured output format.
    pub fn write_item<T: Serialize + Tabled>(
        &self,
        item: &T,
        out: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match self {
            OutputWriter::Table(writer) => writer.write_item(item, out),
            OutputWriter::Json(writer) => writer.write_item(item, out),
        }
    }

    /// Write an optional item; `None` renders as an empty list or as `null`.
    pub fn write_optional<T: Serialize + Tabled>(
        &self,
        item: Option<&T>,
        out: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match (self, item) {
            (_, Some(item)) => self.write_item(item, out),
            (OutputWriter::Table(_), None) => {
                writeln!(out, "(none)")?;
                Ok(())
            }
            (OutputWriter::Json(_), None) => {
                writeln!(out, "null")?;
                Ok(())
            }
        }
    }
}

pub struct TableOutputWriter;

impl TableOutputWriter {
    pub fn write_list<T: Tabled>(
        &self,
        items: &[T],
        out: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        let table = Table::new(items);
        writeln!(out, "{}", table)?;
        Ok(())
    }

    pub fn write_item<T: Tabled>(&self, item: &T, out: &mut dyn std::io::Write) -> anyhow::Result<()> {
        self.write_list(std::slice::from_ref(item), out)
    }
}

pub struct JsonOutputWriter;

impl JsonOutputWriter {
    pub fn write_list<T: Serialize>(
        &self,
        items: &[T],
        out: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(items)?;
        writeln!(out, "{}", json)?;
        Ok(())
    }

    pub fn write_item<T: Serialize>(
        &self,
        item: &T,
        out: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(item)?;
        writeln!(out, "{}", json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tableq::{Message, MessageId, QueueStats};

    fn sample_message() -> Message {
        Message {
            id: MessageId::new(1),
            payload: json!({"job": "resize"}),
            failures: 2,
        }
    }

    fn render<F>(write: F) -> String
    where
        F: FnOnce(&mut dyn std::io::Write) -> anyhow::Result<()>,
    {
        let mut cursor = std::io::Cursor::new(Vec::new());
        write(&mut cursor).unwrap();
        String::from_utf8(cursor.into_inner()).unwrap()
    }

    #[test]
    fn test_json_writer_list() {
        let writer = OutputWriter::from_format("json");
        let output = render(|out| writer.write_list(&[sample_message()], out));
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["id"], json!(1));
        assert_eq!(parsed[0]["payload"]["job"], json!("resize"));
        assert_eq!(parsed[0]["failures"], json!(2));
    }

    #[test]
    fn test_table_writer_item() {
        let writer = OutputWriter::from_format("table");
        let stats = QueueStats {
            queue: "jobs".into(),
            ready: 3,
            reserved: 1,
            failed: 0,
        };
        let output = render(|out| writer.write_item(&stats, out));
        assert!(output.contains("queue"), "Should contain queue header");
        assert!(output.contains("reserved"), "Should contain reserved header");
        assert!(output.contains("jobs"));
        assert!(output.contains('|'), "Should contain table borders");
    }

    #[test]
    fn test_missing_item() {
        let json = OutputWriter::from_format("JSON");
        let table = OutputWriter::from_format("table");
        assert_eq!(render(|out| json.write_optional::<Message>(None, out)), "null\n");
        assert_eq!(render(|out| table.write_optional::<Message>(None, out)), "(none)\n");
    }
}
