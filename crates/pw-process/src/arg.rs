// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command-line argument values and their flattening.

use crate::command::Command;
use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Which end of a substituted command the outer process sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstDirection {
    /// The outer process reads the command's stdout.
    Output,
    /// The outer process writes to the command's stdin.
    Input,
}

/// A command whose pipe is passed to another process as `/dev/fd/N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subst {
    /// The substituted command.
    pub command: Command,
    /// Which end is exposed.
    pub direction: SubstDirection,
}

/// An argument as supplied by the caller, before flattening.
///
/// Build one with `From` (strings, paths, numbers, `bool`, `Option`, `Vec`,
/// arrays) or one of the named constructors. Raw byte strings go through
/// [`Arg::bytes`].
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Missing value. Always rejected.
    Null,
    /// UTF-8 text.
    Text(String),
    /// Raw bytes, passed through unchanged.
    Bytes(Vec<u8>),
    /// Filesystem path.
    Path(PathBuf),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// Boolean, rendered `true` / `false`.
    Bool(bool),
    /// Any other scalar, already rendered through `Display`.
    Display(String),
    /// Nested list, flattened depth-first.
    List(Vec<Arg>),
    /// Reserved.
    Map(Vec<(String, Arg)>),
    /// Reserved.
    Set(Vec<Arg>),
    /// Reserved insertion point.
    Placeholder,
    /// Process substitution.
    Subst(Box<Subst>),
}

impl Arg {
    /// Raw bytes.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Render any `Display` value, e.g. a complex number from another crate.
    pub fn display(value: impl fmt::Display) -> Self {
        Self::Display(value.to_string())
    }

    /// Substitute `command`'s stdout, like `<(command)` in a shell.
    pub fn output_of(command: Command) -> Self {
        Self::Subst(Box::new(Subst {
            command,
            direction: SubstDirection::Output,
        }))
    }

    /// Substitute `command`'s stdin, like `>(command)` in a shell.
    pub fn input_to(command: Command) -> Self {
        Self::Subst(Box::new(Subst {
            command,
            direction: SubstDirection::Input,
        }))
    }
}

macro_rules! arg_from {
    ($variant:ident as $target:ty: $($t:ty),+) => {
        $(impl From<$t> for Arg {
            fn from(value: $t) -> Self {
                Arg::$variant(<$target>::from(value))
            }
        })+
    };
}

arg_from!(Int as i64: i8, i16, i32, i64);
arg_from!(UInt as u64: u16, u32, u64);
arg_from!(Float as f64: f32, f64);
arg_from!(Text as String: &str, String, &String);
arg_from!(Path as PathBuf: &Path, PathBuf);

impl From<isize> for Arg {
    fn from(value: isize) -> Self {
        Arg::Display(value.to_string())
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::Display(value.to_string())
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<&OsStr> for Arg {
    fn from(value: &OsStr) -> Self {
        Arg::Bytes(value.as_bytes().to_vec())
    }
}

impl From<OsString> for Arg {
    fn from(value: OsString) -> Self {
        Arg::Bytes(value.into_vec())
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Null, Into::into)
    }
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(value: Vec<T>) -> Self {
        Arg::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Arg>, const N: usize> From<[T; N]> for Arg {
    fn from(value: [T; N]) -> Self {
        Arg::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Arg> + Clone> From<&[T]> for Arg {
    fn from(value: &[T]) -> Self {
        Arg::List(value.iter().cloned().map(Into::into).collect())
    }
}

/// A flattened argument, ready to hand to the OS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Substituted at spawn time with a `/dev/fd/N` path.
    Subst(Box<Subst>),
}

impl ArgValue {
    /// OS string for the argument. Substitutions have none until spawn.
    pub fn to_os_string(&self) -> Option<OsString> {
        match self {
            Self::Text(s) => Some(OsString::from(s)),
            Self::Bytes(b) => Some(OsString::from_vec(b.clone())),
            Self::Subst(_) => None,
        }
    }

    /// Lossy text form for display and logging.
    pub fn to_string_lossy(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Subst(subst) => format!("<({})>", subst.command),
        }
    }
}

/// Flatten `args` depth-first into `out`, preserving order.
pub(crate) fn flatten<I>(args: I, out: &mut Vec<ArgValue>) -> Result<(), CommandError>
where
    I: IntoIterator<Item = Arg>,
{
    for arg in args {
        match arg {
            Arg::Null => return Err(CommandError::NullArgument { index: out.len() }),
            Arg::Text(s) | Arg::Display(s) => out.push(ArgValue::Text(s)),
            Arg::Bytes(b) => out.push(ArgValue::Bytes(b)),
            Arg::Path(p) => out.push(ArgValue::Bytes(p.into_os_string().into_vec())),
            Arg::Int(n) => out.push(ArgValue::Text(n.to_string())),
            Arg::UInt(n) => out.push(ArgValue::Text(n.to_string())),
            Arg::Float(n) => out.push(ArgValue::Text(n.to_string())),
            Arg::Bool(b) => out.push(ArgValue::Text(b.to_string())),
            Arg::List(items) => flatten(items, out)?,
            Arg::Map(_) => return Err(CommandError::Reserved { syntax: "map" }),
            Arg::Set(_) => return Err(CommandError::Reserved { syntax: "set" }),
            Arg::Placeholder => return Err(CommandError::Reserved { syntax: "placeholder" }),
            Arg::Subst(subst) => out.push(ArgValue::Subst(subst)),
        }
    }
    Ok(())
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```
/// use pw_process::args;
/// let a = args!["ls", "-l", 3, ["x", "y"]];
/// assert_eq!(a.len(), 4);
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),*]
    };
}

/// Build a [`Command`](crate::Command) from heterogeneous values.
///
/// Expands to `Command::new(args![..])` and so returns a `Result`.
#[macro_export]
macro_rules! cmd {
    ($($arg:expr),+ $(,)?) => {
        $crate::Command::new($crate::args![$($arg),+])
    };
}
