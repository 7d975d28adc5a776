use anyhow::Result;
use qan_profile::{BucketPoint, Profile, RankedEntry};
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_profile(&self, instance_id: u64, profile: &Profile) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(profile)?);
            return Ok(());
        }

        let fmt_ts =
            |ts: time::OffsetDateTime| ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string());
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {} .. {}\n",
            self.style("qan-profile", "36;1"),
            self.style(&format!("instance {instance_id}"), "37;1"),
            fmt_ts(profile.window.begin),
            fmt_ts(profile.window.end),
        ));
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("rank by", "90"),
            profile.rank_by.metric,
            profile.rank_by.statistic
        ));

        if !profile.has_data() {
            out.push_str(&format!("{}\n", self.style("no recorded activity in window", "33;1")));
            println!("{}", out.trim_end());
            return Ok(());
        }

        out.push_str(&format!(
            "{} classes={} time={}s\n",
            self.style("totals", "90"),
            profile.total_query_classes,
            profile.total_time_seconds
        ));
        out.push_str(&format!(
            "{}\n",
            self.style(
                &format!(
                    "{:>4}  {:>7}  {:>10}  {:>10}  {:>8}  {:<60}  {}",
                    "rank", "pct", "qps", "load", "count", "trend", "query"
                ),
                "90"
            )
        ));
        for entry in &profile.entries {
            out.push_str(&self.entry_line(entry));
            out.push('\n');
        }

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "empty",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn entry_line(&self, entry: &RankedEntry) -> String {
        let rank = if entry.is_global() {
            self.style("TOTAL", "37;1")
        } else {
            format!("{:>4}", entry.rank)
        };
        let query = match (&entry.display_id, &entry.abstract_text) {
            (Some(id), Some(text)) => format!("{} {text}", self.style(id, "36")),
            (Some(id), None) => self.style(id, "36"),
            _ if entry.is_global() => String::new(),
            _ => entry
                .query_class_id
                .map(|id| format!("class {id}"))
                .unwrap_or_default(),
        };
        format!(
            "{rank:>4}  {:>6.2}%  {:>10.4}  {:>10.4}  {:>8}  {}  {query}",
            entry.percentage * 100.0,
            entry.qps,
            entry.load,
            entry.stat.count,
            sparkline(&entry.series),
        )
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

/// Oldest point on the left; heights scale with each point's sum.
fn sparkline(points: &[BucketPoint]) -> String {
    let max = points.iter().map(|p| p.sum).fold(0.0_f64, f64::max);
    points
        .iter()
        .rev()
        .map(|p| {
            if max <= 0.0 || p.count == 0 {
                ' '
            } else {
                let level = ((p.sum / max) * (SPARK.len() - 1) as f64).round() as usize;
                SPARK[level.min(SPARK.len() - 1)]
            }
        })
        .collect()
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}
