//! Command builder

use bytes::BytesMut;

/// Conversion of a host value into a binary command argument
pub trait ToArg {
    fn to_arg(&self) -> Vec<u8>;
}

impl ToArg for str {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Vec<u8> {
        self.clone()
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Vec<u8> {
        (**self).to_arg()
    }
}

macro_rules! numeric_to_arg {
    ($($t:ty),*) => {
        $(
            impl ToArg for $t {
                fn to_arg(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }
            }
        )*
    };
}

numeric_to_arg!(i32, i64, u16, u32, u64, usize, f64);

/// A command name plus its ordered argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
}

impl Cmd {
    /// Create a command with the given name
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![name.as_bytes().to_vec()],
        }
    }

    /// Append an argument (builder style)
    pub fn arg<T: ToArg>(mut self, arg: T) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append an argument in place
    pub fn push_arg<T: ToArg>(&mut self, arg: T) {
        self.args.push(arg.to_arg());
    }

    /// Upper-cased command name
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }

    /// Full argument vector including the command name
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Encode as a RESP array of bulk strings
    pub fn encode(&self, buf: &mut BytesMut) {
        super::codec::encode_command(&self.args, buf);
    }
}

/// Shorthand for [`Cmd::new`]
pub fn cmd(name: &str) -> Cmd {
    Cmd::new(name)
}
