/// Turns one command (name followed by its arguments) into output bytes.
/// Arguments are raw bytes: Redis keys and values need not be UTF-8.
pub type Serializer = fn(&[Vec<u8>]) -> Vec<u8>;

/// RESP array of bulk strings, ready to be piped into `redis-cli --pipe`.
pub fn resp_serializer(args: &[Vec<u8>]) -> Vec<u8> {
    let size: usize = args.iter().map(|arg| arg.len() + 16).sum();
    let mut result = Vec::with_capacity(size + 16);
    result.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());

    for arg in args {
        result.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        result.extend_from_slice(arg);
        result.extend_from_slice(b"\r\n");
    }
    result
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_graphic() && !matches!(byte, b'"' | b'\'' | b'\\')
}

/// Double-quoted form `redis-cli` parses back: escapes for quotes,
/// backslashes and control characters, `\xHH` for everything else.
fn quoted(arg: &[u8], out: &mut Vec<u8>) {
    out.push(b'"');
    for &byte in arg {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'"' => out.extend_from_slice(b"\\\""),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x07 => out.extend_from_slice(b"\\a"),
            0x08 => out.extend_from_slice(b"\\b"),
            b' ' | b'\'' => out.push(byte),
            _ if byte.is_ascii_graphic() => out.push(byte),
            _ => out.extend_from_slice(format!("\\x{byte:02x}").as_bytes()),
        }
    }
    out.push(b'"');
}

/// Human readable `redis-cli` style command line, one command per line.
pub fn command_serializer(args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        if !arg.is_empty() && arg.iter().copied().all(is_plain) {
            out.extend_from_slice(arg);
        } else {
            quoted(arg, &mut out);
        }
    }
    out
}
