//! Builder for emitting the bytecode of a single code object.
//!
//! `CodeBuilder` appends encoded instructions, interns constants, manages
//! labels and forward-jump fixups, and shadows the VM operand stack so the
//! finished code object carries a correct `stacksize`.

use ahash::AHashMap;

use super::{
    code::{Code, Const},
    op::Opcode,
};

/// Inline small-int window of the VM's `LoadConstSmallInt` encoding.
///
/// Open interval on both ends; values outside it go through the pool.
const SMALL_INT_MIN: i64 = -(1 << 30);
const SMALL_INT_MAX: i64 = (1 << 30) - 1;

/// Hashable key for interning [`Const`] pool entries.
///
/// Mirrors `Const` minus the `Code` variant, which is never interned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    Str(Box<str>),
    Bytes(Box<[u8]>),
}

/// Append-only assembler for one code object.
///
/// Every emit updates the shadow stack depth by the opcode's static effect
/// (or an operand-derived one) and refreshes the high-water mark that
/// becomes the code object's `stacksize`.
///
/// # Usage
///
/// ```ignore
/// let mut builder = CodeBuilder::new();
/// let end = builder.get_label();
/// builder.emit_name(Opcode::LoadName, "x");
/// builder.jump(Opcode::PopJumpIfFalse, end);
/// builder.load_int(1);
/// builder.emit(Opcode::PopTop);
/// builder.put_label(end);
/// let code = builder.build();
/// ```
#[derive(Debug, Default)]
pub struct CodeBuilder {
    /// The bytecode being built.
    bytecode: Vec<u8>,

    /// Constants in first-insertion order.
    constants: Vec<Const>,

    /// Interning map from internable constants to their pool index.
    const_index: AHashMap<ConstKey, u16>,

    /// Label id to bound offset; `None` until `put_label`.
    labels: Vec<Option<u32>>,

    /// Jump sites emitted before their target was bound.
    fixups: Vec<Fixup>,

    /// Simulated operand-stack depth at the current instruction.
    stack_depth: i32,

    /// High-water mark of `stack_depth`.
    max_stack_depth: i32,
}

impl CodeBuilder {
    /// Creates a new empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.bytecode.push(op as u8);
        self.adjust_stack(i32::from(Self::fixed_effect(op)));
    }

    /// Emits an instruction with a u16 operand (slot index, pool index or
    /// element count, little-endian).
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        let effect = match op {
            // The sequence builders pop their elements and push one object.
            Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet => 1 - i32::from(operand),
            _ => i32::from(Self::fixed_effect(op)),
        };
        self.adjust_stack(effect);
    }

    /// Emits an instruction with an i32 immediate operand (little-endian).
    pub fn emit_i32(&mut self, op: Opcode, operand: i32) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        self.adjust_stack(i32::from(Self::fixed_effect(op)));
    }

    /// Emits `CallFunction` with a positional-argument count.
    ///
    /// The keyword-argument count byte is always zero in this subset.
    pub fn emit_call_function(&mut self, nargs: u8) {
        self.bytecode.push(Opcode::CallFunction as u8);
        self.bytecode.push(nargs);
        self.bytecode.push(0);
        // Pops the callee and the arguments, pushes the result.
        self.adjust_stack(-i32::from(nargs));
    }

    /// Interns `name` as a pool atom and emits `op` with its index.
    pub fn emit_name(&mut self, op: Opcode, name: &str) {
        let index = self.intern_name(name);
        self.emit_u16(op, index);
    }

    /// Adds `value` to the constant pool and emits `op` with its index.
    pub fn emit_const(&mut self, op: Opcode, value: Const) {
        let index = self.add_const(value);
        self.emit_u16(op, index);
    }

    /// Emits an integer literal, choosing the inline immediate encoding for
    /// values inside the VM's small-int window and the pool otherwise.
    pub fn load_int(&mut self, value: i64) {
        if SMALL_INT_MIN < value && value < SMALL_INT_MAX {
            // Cast is lossless: the window is well inside i32 range.
            self.emit_i32(Opcode::LoadConstSmallInt, value as i32);
        } else {
            self.emit_const(Opcode::LoadConstObj, Const::Int(value));
        }
    }

    /// Interns a name atom in the constant pool, returning its index.
    ///
    /// Parameter names are inserted through this before a function body is
    /// emitted so they occupy the lowest pool indices.
    pub fn intern_name(&mut self, name: &str) -> u16 {
        self.add_const(Const::Str(name.into()))
    }

    /// Adds a constant to the pool, returning its index.
    ///
    /// Equal ints, strings and byte strings are coalesced by structural
    /// equality; code objects always get a fresh slot.
    ///
    /// # Panics
    ///
    /// Panics if the pool exceeds 65535 entries.
    pub fn add_const(&mut self, value: Const) -> u16 {
        let key = match &value {
            Const::Int(n) => ConstKey::Int(*n),
            Const::Str(s) => ConstKey::Str(s.clone()),
            Const::Bytes(b) => ConstKey::Bytes(b.clone()),
            Const::Code(_) => return self.push_const(value),
        };
        if let Some(&index) = self.const_index.get(&key) {
            return index;
        }
        let index = self.push_const(value);
        self.const_index.insert(key, index);
        index
    }

    fn push_const(&mut self, value: Const) -> u16 {
        let index =
            u16::try_from(self.constants.len()).expect("constant pool exceeds u16 range (65535); too many constants");
        self.constants.push(value);
        index
    }

    /// Returns a fresh unbound label.
    #[must_use]
    pub fn get_label(&mut self) -> Label {
        let label = Label(u32::try_from(self.labels.len()).expect("label count exceeds u32"));
        self.labels.push(None);
        label
    }

    /// Binds `label` to the current bytecode offset.
    ///
    /// # Panics
    ///
    /// Panics if the label is already bound.
    pub fn put_label(&mut self, label: Label) {
        let offset = u32::try_from(self.bytecode.len()).expect("bytecode length exceeds u32");
        let slot = &mut self.labels[label.index()];
        assert!(slot.is_none(), "label {} bound twice", label.0);
        *slot = Some(offset);
    }

    /// Emits a branch instruction targeting `label`.
    ///
    /// Bound targets are encoded immediately; unbound targets get a
    /// placeholder displacement and a fixup resolved by [`Self::build`].
    pub fn jump(&mut self, op: Opcode, label: Label) {
        // ForIter pushes the next element on the fall-through edge; its
        // exit edge leaves the depth untouched.
        let effect = match op {
            Opcode::ForIter => 1,
            _ => i32::from(Self::fixed_effect(op)),
        };
        self.bytecode.push(op as u8);
        let site = self.bytecode.len();
        if let Some(target) = self.labels[label.index()] {
            let offset = Self::branch_offset(site, target);
            self.bytecode.extend_from_slice(&offset.to_le_bytes());
        } else {
            self.bytecode.extend_from_slice(&0i16.to_le_bytes());
            self.fixups.push(Fixup { site, label });
        }
        self.adjust_stack(effect);
    }

    /// Returns the current tracked stack depth.
    #[must_use]
    pub fn stack_depth(&self) -> i32 {
        self.stack_depth
    }

    /// Overwrites the tracked depth.
    ///
    /// Used when a branch reconverges with a depth the emitted opcodes alone
    /// cannot express: the `PopTop` cleanup before a for-loop `break` runs
    /// only at runtime, while the tracked depth must match the natural loop
    /// exit.
    pub fn set_stack_depth(&mut self, depth: i32) {
        self.stack_depth = depth;
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }

    /// Adjusts the tracked depth by a delta the caller computed itself.
    pub fn adjust_stack_depth(&mut self, delta: i32) {
        self.adjust_stack(delta);
    }

    /// Resolves all pending fixups and produces the finished code object.
    ///
    /// # Panics
    ///
    /// Panics if any label referenced by a jump was never bound.
    #[must_use]
    pub fn build(mut self) -> Code {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.index()].expect("unbound label at finalization");
            let bytes = Self::branch_offset(fixup.site, target).to_le_bytes();
            self.bytecode[fixup.site] = bytes[0];
            self.bytecode[fixup.site + 1] = bytes[1];
        }
        let stacksize = u16::try_from(self.max_stack_depth).expect("stack depth exceeds u16");
        Code::new(self.bytecode, self.constants, stacksize)
    }

    /// Displacement from the end of the 2-byte operand at `site` to `target`.
    fn branch_offset(site: usize, target: u32) -> i16 {
        let site = i64::try_from(site).expect("bytecode offset exceeds i64");
        let raw = i64::from(target) - (site + 2);
        i16::try_from(raw).expect("jump offset exceeds i16 range (-32768..32767); code too large")
    }

    fn fixed_effect(op: Opcode) -> i16 {
        op.stack_effect()
            .unwrap_or_else(|| panic!("opcode {op} requires operand-aware emission"))
    }

    fn adjust_stack(&mut self, delta: i32) {
        let depth = self.stack_depth + delta;
        assert!(depth >= 0, "operand stack underflow during compilation: depth {depth}");
        self.stack_depth = depth;
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }
}

/// Id of a branch target, resolved at finalization.
///
/// Obtained from [`CodeBuilder::get_label`], bound with
/// [`CodeBuilder::put_label`].
#[derive(Debug, Clone, Copy)]
pub struct Label(u32);

impl Label {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A jump site awaiting its label's offset.
#[derive(Debug)]
struct Fixup {
    /// Offset of the 2-byte displacement operand.
    site: usize,
    label: Label,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadConstNone);
        builder.emit(Opcode::PopTop);

        let code = builder.build();
        assert_eq!(code.bytecode(), &[Opcode::LoadConstNone as u8, Opcode::PopTop as u8]);
    }

    #[test]
    fn test_forward_jump_resolved_at_build() {
        let mut builder = CodeBuilder::new();
        let end = builder.get_label();
        builder.jump(Opcode::Jump, end);
        builder.emit(Opcode::LoadConstNone); // 1 byte, skipped by the jump
        builder.emit(Opcode::PopTop); // 1 byte, skipped by the jump
        builder.put_label(end);

        let code = builder.build();
        // Jump at offset 0, operand at 1..3, target at offset 5.
        // Displacement = 5 - 3 = 2.
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::Jump as u8,
                2,
                0,
                Opcode::LoadConstNone as u8,
                Opcode::PopTop as u8,
            ]
        );
    }

    #[test]
    fn test_backward_jump_inlined() {
        let mut builder = CodeBuilder::new();
        let top = builder.get_label();
        builder.put_label(top);
        builder.emit(Opcode::LoadConstNone); // offset 0
        builder.emit(Opcode::PopTop); // offset 1
        builder.jump(Opcode::Jump, top); // offset 2, operand at 3..5

        let code = builder.build();
        // Displacement = 0 - 5 = -5.
        let expected = (-5i16).to_le_bytes();
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadConstNone as u8,
                Opcode::PopTop as u8,
                Opcode::Jump as u8,
                expected[0],
                expected[1],
            ]
        );
    }

    #[test]
    #[should_panic(expected = "unbound label at finalization")]
    fn test_unbound_label_panics() {
        let mut builder = CodeBuilder::new();
        let nowhere = builder.get_label();
        builder.jump(Opcode::Jump, nowhere);
        let _ = builder.build();
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn test_label_bound_twice_panics() {
        let mut builder = CodeBuilder::new();
        let label = builder.get_label();
        builder.put_label(label);
        builder.put_label(label);
    }

    #[test]
    fn test_const_interning() {
        let mut builder = CodeBuilder::new();
        let a = builder.add_const(Const::Str("x".into()));
        let b = builder.add_const(Const::Int(7));
        let c = builder.add_const(Const::Str("x".into()));
        let d = builder.add_const(Const::Int(7));
        let e = builder.add_const(Const::Bytes(b"x".as_slice().into()));

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(c, 0, "equal strings must share a pool slot");
        assert_eq!(d, 1, "equal ints must share a pool slot");
        assert_eq!(e, 2, "bytes never coalesce with strings");
        assert_eq!(builder.build().constants().len(), 3);
    }

    #[test]
    fn test_load_int_small_window() {
        let mut builder = CodeBuilder::new();
        builder.load_int(5);
        let code = builder.build();
        assert_eq!(code.bytecode(), &[Opcode::LoadConstSmallInt as u8, 5, 0, 0, 0]);
        assert!(code.constants().is_empty());
    }

    #[test]
    fn test_load_int_window_bounds() {
        // Both bounds are excluded from the inline encoding.
        let mut builder = CodeBuilder::new();
        builder.load_int(SMALL_INT_MAX);
        builder.load_int(SMALL_INT_MIN);
        builder.load_int(SMALL_INT_MAX - 1);
        builder.load_int(SMALL_INT_MIN + 1);
        builder.load_int(1 << 40);

        let code = builder.build();
        assert_eq!(
            code.constants(),
            &[
                Const::Int(SMALL_INT_MAX),
                Const::Int(SMALL_INT_MIN),
                Const::Int(1 << 40)
            ]
        );
    }

    #[test]
    fn test_stack_high_water_mark() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadConstNone);
        builder.emit(Opcode::LoadConstNone);
        builder.emit(Opcode::LoadConstNone);
        builder.emit_u16(Opcode::BuildTuple, 3);
        builder.emit(Opcode::PopTop);

        let code = builder.build();
        assert_eq!(code.stacksize, 3);
    }

    #[test]
    fn test_get_iter_stack_reserves_slots() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadConstNone);
        builder.emit(Opcode::GetIterStack);
        assert_eq!(builder.stack_depth(), 4);
    }

    #[test]
    #[should_panic(expected = "operand stack underflow")]
    fn test_underflow_panics() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::PopTop);
    }

    #[test]
    fn test_call_function_effect() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadConstNone); // callee
        builder.emit(Opcode::LoadConstNone); // arg 1
        builder.emit(Opcode::LoadConstNone); // arg 2
        builder.emit_call_function(2);
        assert_eq!(builder.stack_depth(), 1);

        let code = builder.build();
        assert_eq!(&code.bytecode()[3..], &[Opcode::CallFunction as u8, 2, 0]);
    }
}
