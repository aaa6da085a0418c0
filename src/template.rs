use crate::error::TemplateError;
use crate::state::PipelineState;

/// How expanded attribute values are escaped before insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Escape {
    /// Insert the value verbatim (request body templates).
    None,
    /// Percent-encode everything outside the URI unreserved set.
    Uri,
}

/// Expands `%{Attr-Name}` references against pipeline state.
///
/// Unknown attributes expand to the empty string, matching the original
/// expansion semantics; `%%` produces a literal percent sign. A `%{`
/// without a closing brace is an error.
pub(crate) fn expand(
    template: &str,
    state: &dyn PipelineState,
    escape: Escape,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(index) = rest.find('%') {
        out.push_str(&rest[..index]);
        rest = &rest[index + 1..];

        match rest.as_bytes().first() {
            Some(b'%') => {
                out.push('%');
                rest = &rest[1..];
            }
            Some(b'{') => {
                let Some(end) = rest.find('}') else {
                    return Err(TemplateError::Unterminated {
                        template: template.to_owned(),
                    });
                };
                let name = &rest[1..end];
                if let Some(value) = state.get(name) {
                    match escape {
                        Escape::None => out.push_str(value),
                        Escape::Uri => push_uri_escaped(&mut out, value),
                    }
                }
                rest = &rest[end + 1..];
            }
            _ => out.push('%'),
        }
    }
    out.push_str(rest);

    Ok(out)
}

fn push_uri_escaped(out: &mut String, value: &str) {
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0').to_ascii_uppercase());
            out.push(char::from_digit(u32::from(byte & 0x0f), 16).unwrap_or('0').to_ascii_uppercase());
        }
    }
}
