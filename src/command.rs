//! A single request: command name followed by its arguments.

use bytes::Bytes;

use crate::resp::writer::{encode_command, write_command};

/// An ordered list of binary-safe tokens. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Build from any sequence of byte-like tokens. The first token is the name.
    pub fn new<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self {
            args: args
                .into_iter()
                .map(|a| Bytes::copy_from_slice(a.as_ref()))
                .collect(),
        }
    }

    /// Build from tokens that are already `Bytes`, without copying.
    pub fn from_bytes(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// Uppercased command name, used to look up the response shaping.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Every token after the name.
    pub fn params(&self) -> &[Bytes] {
        self.args.get(1..).unwrap_or(&[])
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Wire encoding of this command.
    pub fn encode(&self) -> Vec<u8> {
        encode_command(&self.args)
    }

    /// Append the wire encoding to an existing batch buffer.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        write_command(buf, &self.args);
    }
}

impl AsRef<[Bytes]> for Command {
    fn as_ref(&self) -> &[Bytes] {
        &self.args
    }
}

/// Build a [`Command`] from a list of byte-like expressions.
///
/// ```ignore
/// let c = cmd!("SET", "key", value_bytes);
/// ```
#[macro_export]
macro_rules! cmd {
    ($($arg:expr),+ $(,)?) => {{
        let args: ::std::vec::Vec<$crate::bytes::Bytes> = ::std::vec![
            $($crate::bytes::Bytes::copy_from_slice(::std::convert::AsRef::<[u8]>::as_ref(&$arg))),+
        ];
        $crate::command::Command::from_bytes(args)
    }};
}
