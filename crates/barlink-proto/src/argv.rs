//! Command tokenization into the bar's argv framing.

/// Encodes a human-typed command line into the wire form the bar parses:
/// a contiguous buffer of NUL-separated argument fragments ending in a
/// single terminal NUL. The buffer length is the byte count to transmit.
///
/// A quote character (`'` or `"`) toggles quoting and is elided from the
/// output; a space outside quotes becomes an argument boundary; every
/// other byte is copied verbatim. An unterminated quote is not an error,
/// the rest of the input simply stays in the current argument.
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(cmd.len() + 1);
    let mut quote: Option<u8> = None;

    for byte in cmd.bytes() {
        match byte {
            b'"' | b'\'' => {
                if quote == Some(byte) {
                    quote = None;
                } else {
                    quote = Some(byte);
                }
            }
            b' ' if quote.is_none() => out.push(0),
            _ => out.push(byte),
        }
    }

    out.push(0);
    // A command ending on an argument boundary would otherwise transmit
    // a trailing empty argument.
    if out.len() >= 2 && out[out.len() - 2] == 0 {
        out.pop();
    }

    out
}
