//! Response shaping for the queue path: JSON vs plain-text projection of a
//! compilation result, per spec.md §4.7.

use serde_json::Value;

use crate::logs::strip_ansi;

/// Strips `guid` and `s3Key` from a compilation result before emission, per
/// spec.md §4.7.
pub fn strip_internal_fields(mut result: Value) -> Value {
    if let Value::Object(map) = &mut result {
        map.remove("guid");
        map.remove("s3Key");
    }
    result
}

/// Produces the plain-text projection of a compilation result, per spec.md
/// §4.7. When `filter_ansi` is true, ANSI CSI sequences are stripped from
/// every projected text.
pub fn render_plain_text(result: &Value, filter_ansi: bool) -> String {
    let mut out = String::new();
    out.push_str("# Compilation provided by Compiler Explorer at https://godbolt.org/\n");

    if let Some(asm) = result.get("asm").and_then(Value::as_array) {
        let lines: Vec<&str> = asm
            .iter()
            .filter_map(|entry| entry.get("text").and_then(Value::as_str))
            .collect();
        out.push_str(&lines.join("\n"));
        if !lines.is_empty() {
            out.push('\n');
        }
    }

    if let Some(code) = result.get("code").and_then(Value::as_i64) {
        if code != 0 {
            out.push_str(&format!("# Compiler exited with result code {code}\n"));
        }
    }

    render_labelled_streams(&mut out, result);

    if let Some(exec) = result.get("execResult") {
        if let Some(code) = exec.get("code").and_then(Value::as_i64) {
            out.push_str(&format!("# Execution build compiler returned: {code}\n"));
        }
        render_labelled_streams(&mut out, exec);
    }

    if filter_ansi {
        strip_ansi(&out)
    } else {
        out
    }
}

/// Appends `stdout`/`stderr` blocks (each entry's `text` field, one per
/// line), labelled, to `out`.
fn render_labelled_streams(out: &mut String, value: &Value) {
    for stream in ["stdout", "stderr"] {
        if let Some(lines) = value.get(stream).and_then(Value::as_array) {
            for entry in lines {
                if let Some(text) = entry.get("text").and_then(Value::as_str) {
                    out.push_str(&format!("{stream}: {text}\n"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_internal_fields_removes_guid_and_s3_key() {
        let result = json!({ "guid": "abc", "s3Key": "x", "code": 0 });
        let stripped = strip_internal_fields(result);
        assert_eq!(stripped, json!({ "code": 0 }));
    }

    #[test]
    fn plain_text_includes_banner_and_asm() {
        let result = json!({ "code": 0, "asm": [{"text": "mov eax, 0"}, {"text": "ret"}] });
        let text = render_plain_text(&result, false);
        assert!(text.starts_with("# Compilation provided by Compiler Explorer at https://godbolt.org/\n"));
        assert!(text.contains("mov eax, 0\nret"));
        assert!(!text.contains("exited with result code"));
    }

    #[test]
    fn plain_text_reports_nonzero_exit_code() {
        let result = json!({ "code": 1, "stderr": [{"text": "error: x"}] });
        let text = render_plain_text(&result, false);
        assert!(text.contains("# Compiler exited with result code 1"));
        assert!(text.contains("stderr: error: x"));
    }

    #[test]
    fn plain_text_includes_exec_result_block() {
        let result = json!({
            "code": 0,
            "execResult": { "code": 0, "stdout": [{"text": "hello"}] }
        });
        let text = render_plain_text(&result, false);
        assert!(text.contains("stdout: hello"));
    }

    #[test]
    fn filter_ansi_strips_color_codes_from_projection() {
        let result = json!({ "code": 0, "stdout": [{"text": "\x1b[31mred\x1b[0m"}] });
        let text = render_plain_text(&result, true);
        assert!(text.contains("stdout: red"));
        assert!(!text.contains("\x1b"));
    }
}
