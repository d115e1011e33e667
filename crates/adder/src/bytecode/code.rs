//! Code object containing compiled bytecode and metadata.
//!
//! A `Code` object represents one compiled lexical scope: the module itself
//! or a function. Nested function code objects live in the enclosing scope's
//! constant pool, so the module's `Code` transitively owns the whole program.

/// Compiled bytecode for a module or function.
///
/// This is the output of the compiler and the input to the VM. The
/// instruction stream and constant pool are frozen by
/// [`CodeBuilder::build`](super::CodeBuilder::build); the display metadata
/// (`name`, `filename`, `argcount`) and the `stacksize` adjustment for
/// function locals are filled in afterwards by the compiler, which is why
/// those fields are public.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Code {
    /// Display name: `"<module>"` or the function name.
    pub name: Box<str>,

    /// Source origin, copied from the compiler's filename.
    pub filename: Box<str>,

    /// Number of positional parameters (functions only).
    pub argcount: u16,

    /// Operand-stack slots the VM must reserve for a frame running this
    /// code. Starts as the compile-time high-water mark; for functions the
    /// compiler adds the fast-local count on top.
    pub stacksize: u16,

    /// Raw instruction bytes: one-byte opcodes with variable-length operands.
    bytecode: Vec<u8>,

    /// Constant pool, referenced by index from the instruction stream.
    ///
    /// Ordered by first insertion; equal ints, strings and byte strings are
    /// coalesced, nested code objects are not.
    constants: Vec<Const>,
}

impl Code {
    pub(crate) fn new(bytecode: Vec<u8>, constants: Vec<Const>, stacksize: u16) -> Self {
        Self {
            name: Box::default(),
            filename: Box::default(),
            argcount: 0,
            stacksize,
            bytecode,
            constants,
        }
    }

    /// Returns the raw bytecode bytes.
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Returns the constant pool.
    #[must_use]
    pub fn constants(&self) -> &[Const] {
        &self.constants
    }
}

/// One entry of a code object's constant pool.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Const {
    Int(i64),
    Str(Box<str>),
    Bytes(Box<[u8]>),
    /// A nested function's code object.
    Code(Box<Code>),
}
