use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use serde::Serialize;
use serde_json::Value;
use stars_link::api::SearchResult;
use stars_link::push::PushEvent;
use std::io::Write;

pub struct OutputManager {
    format: OutputFormat,
    colored: bool,
}

impl OutputManager {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn format_value(&self, value: &Value) -> Result<String> {
        match self.format {
            OutputFormat::Pretty => Ok(serde_json::to_string_pretty(value)?),
            OutputFormat::Json => Ok(serde_json::to_string(value)?),
        }
    }

    pub fn format_event(&self, event: &PushEvent) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(event)?),
            OutputFormat::Pretty => Ok(format!(
                "{} {} {}",
                self.colorize(&format!("[{}]", event.topic), &Color::Blue, false),
                self.colorize(event.kind.as_str(), &Color::Green, true),
                serde_json::to_string(&event.data)?
            )),
        }
    }

    pub fn format_search_results(&self, results: &[SearchResult]) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.to_json_line(results),
            OutputFormat::Pretty => {
                if results.is_empty() {
                    return Ok(self.colorize("No places found", &Color::Yellow, false));
                }
                let mut output = String::new();
                output.push_str(&self.colorize(
                    &format!("Found {} place(s):", results.len()),
                    &Color::Green,
                    true,
                ));
                output.push('\n');
                for result in results {
                    output.push_str(&format!(
                        "  {} {}  {}\n",
                        self.colorize(&format!("#{}", result.id), &Color::Cyan, false),
                        self.colorize(&result.name, &Color::Yellow, true),
                        result.address
                    ));
                }
                Ok(output.trim_end().to_string())
            }
        }
    }

    pub fn status(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({"status": "ok", "message": message}).to_string(),
            OutputFormat::Pretty => format!("{} {}", self.colorize("✓", &Color::Green, true), message),
        }
    }

    fn to_json_line<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
}

/// Write one line to stdout and flush, so piped consumers see events promptly.
pub fn emit(line: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> PushEvent {
        PushEvent {
            topic: "congestion".into(),
            kind: "congestion-update".into(),
            data: json!({"level": 2}),
            id: None,
        }
    }

    #[test]
    fn test_event_json_line() {
        let output = OutputManager::new(OutputFormat::Json, false);
        let line = output.format_event(&event()).unwrap();
        assert_eq!(
            line,
            r#"{"topic":"congestion","kind":"congestion-update","data":{"level":2}}"#
        );
    }

    #[test]
    fn test_event_pretty_without_color() {
        let output = OutputManager::new(OutputFormat::Pretty, false);
        assert_eq!(
            output.format_event(&event()).unwrap(),
            r#"[congestion] congestion-update {"level":2}"#
        );
    }

    #[test]
    fn test_empty_search() {
        let output = OutputManager::new(OutputFormat::Pretty, false);
        assert_eq!(output.format_search_results(&[]).unwrap(), "No places found");
        let output = OutputManager::new(OutputFormat::Json, false);
        assert_eq!(output.format_search_results(&[]).unwrap(), "[]");
    }
}
