//! Step outputs and workflow annotations for the invoking CI runner.
//!
//! Outputs are appended to the file named by `GITHUB_OUTPUT` as `key=value`
//! lines; values spanning several lines use the `key<<DELIM` heredoc form.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use crate::now_millis;

pub const OUTPUT_FILE_ENV: &str = "GITHUB_OUTPUT";

pub fn append_output(path: &Path, key: &str, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if value.contains('\n') || value.contains('\r') {
        let delimiter = heredoc_delimiter(value);
        writeln!(file, "{key}<<{delimiter}")?;
        writeln!(file, "{value}")?;
        writeln!(file, "{delimiter}")?;
    } else {
        writeln!(file, "{key}={value}")?;
    }
    Ok(())
}

pub fn notice(title: &str, message: &str) {
    println!("{}", notice_line(title, message));
}

pub fn error_annotation(message: &str) {
    println!("{}", error_line(message));
}

pub fn notice_line(title: &str, message: &str) -> String {
    format!(
        "::notice title={}::{}",
        escape_property(title),
        escape_data(message)
    )
}

pub fn error_line(message: &str) -> String {
    format!("::error::{}", escape_data(message))
}

fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}

fn heredoc_delimiter(value: &str) -> String {
    let mut delimiter = format!("rbt_{:x}_{:x}", now_millis(), std::process::id());
    while value.contains(&delimiter) {
        delimiter.push('_');
    }
    delimiter
}
