//! RESP serializer.
//!
//! Requests go out as an array of bulk strings:
//! `*<N>\r\n$<len>\r\narg1\r\n$<len>\r\narg2\r\n…`
//!
//! [`encode_value`] writes any reply shape back to the wire, which the test
//! servers use to answer and the codec tests use for round trips.

use itoa::Buffer;

use crate::resp::types::RespValue;

/// Encode a command (list of arguments) into RESP wire format.
///
/// Each argument is treated as a binary-safe bulk string.
///
/// # Example
/// ```ignore
/// let bytes = encode_command(&[b"SET", b"key", b"value"]);
/// // → *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
/// ```
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(command_capacity(args));
    write_command(&mut buf, args);
    buf
}

/// Encode multiple commands into a single buffer for pipelined writes.
///
/// Everything lands in one contiguous `Vec<u8>` so the batch goes out in
/// a single `write_all`.
pub fn encode_pipeline<C, A>(commands: &[C]) -> Vec<u8>
where
    C: AsRef<[A]>,
    A: AsRef<[u8]>,
{
    let cap = commands.iter().map(|c| command_capacity(c.as_ref())).sum();
    let mut buf = Vec::with_capacity(cap);
    for cmd in commands {
        write_command(&mut buf, cmd.as_ref());
    }
    buf
}

/// Append one encoded command to `buf`.
pub fn write_command<A: AsRef<[u8]>>(buf: &mut Vec<u8>, args: &[A]) {
    let mut itoa_buf = Buffer::new();

    // *<N>\r\n
    buf.push(b'*');
    buf.extend_from_slice(itoa_buf.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");

    for arg in args {
        write_bulk(buf, &mut itoa_buf, arg.as_ref());
    }
}

/// Encode a reply value into RESP wire format.
pub fn encode_value(value: &RespValue) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(&mut buf, &mut Buffer::new(), value);
    buf
}

fn write_value(buf: &mut Vec<u8>, itoa_buf: &mut Buffer, value: &RespValue) {
    match value {
        RespValue::SimpleString(s) => write_line(buf, b'+', s.as_bytes()),
        RespValue::Error(msg) => write_line(buf, b'-', msg.as_bytes()),
        RespValue::Integer(i) => {
            buf.push(b':');
            buf.extend_from_slice(itoa_buf.format(*i).as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(data) => write_bulk(buf, itoa_buf, data),
        RespValue::Null => buf.extend_from_slice(b"$-1\r\n"),
        RespValue::Array(items) => {
            buf.push(b'*');
            buf.extend_from_slice(itoa_buf.format(items.len()).as_bytes());
            buf.extend_from_slice(b"\r\n");
            for item in items {
                write_value(buf, itoa_buf, item);
            }
        }
    }
}

/// `$<len>\r\n<data>\r\n`
fn write_bulk(buf: &mut Vec<u8>, itoa_buf: &mut Buffer, data: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(itoa_buf.format(data.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, line: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(line);
    buf.extend_from_slice(b"\r\n");
}

fn command_capacity<A: AsRef<[u8]>>(args: &[A]) -> usize {
    // '*' + max_digits(usize) + \r\n, then '$' + len + \r\n + data + \r\n per arg
    let mut cap = 1 + 20 + 2;
    for arg in args {
        cap += 1 + 20 + 2 + arg.as_ref().len() + 2;
    }
    cap
}

// ── Tests ──────────────────────────────────────────────────────────
