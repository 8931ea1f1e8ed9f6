// SPDX-License-Identifier: Apache-2.0 OR MIT
use crate::value::Value;

/// Append-only output buffer for one render.
#[derive(Default)]
pub struct OutputBuffer {
    buf: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    /// Appends a value's display form; null-like values contribute nothing.
    pub fn push_value(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            other => self.buf.push_str(&other.display_string()),
        }
    }

    /// Returns the buffered output, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_values_append_nothing() {
        let mut out = OutputBuffer::new();
        out.push_str("a");
        out.push_value(&Value::Null);
        out.push_value(&Value::int(3));
        assert_eq!(out.take(), "a3");
        assert_eq!(out.take(), "");
    }
}
