//! Opcode namespace of the target VM.
//!
//! Identifiers and stack deltas are fixed by the interpreter this compiler
//! targets; the compiler only selects and encodes them. Instructions are
//! variable-length: a one-byte opcode followed by the operand bytes listed
//! below (all multi-byte operands little-endian).
//!
//! | operand | opcodes |
//! |---|---|
//! | none | stack shuffles, unary/binary/compare/in-place ops, `LoadConstNone`, `GetIterStack`, `StoreMap`, `ImportStar`, `ReturnValue` |
//! | u16 pool index | `LoadConstString`, `LoadConstObj`, the name/global load/store family, `LoadAttr`/`StoreAttr`, `ImportName`/`ImportFrom`, `MakeFunction` |
//! | u16 slot index | `LoadFastN`/`StoreFastN`, `LoadDeref`/`StoreDeref` |
//! | u16 count | the `Build*` family |
//! | i32 immediate | `LoadConstSmallInt` |
//! | i16 displacement | `Jump`, the conditional jumps, `ForIter` |
//! | u8 + u8 | `CallFunction` (positional count, keyword count) |

/// One opcode of the target VM's instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum Opcode {
    PopTop,
    DupTop,

    LoadConstNone,
    LoadConstSmallInt,
    LoadConstString,
    LoadConstObj,

    LoadName,
    LoadGlobal,
    LoadFastN,
    LoadDeref,
    LoadAttr,

    StoreName,
    StoreGlobal,
    StoreFastN,
    StoreDeref,
    StoreAttr,
    StoreNameConst,
    StoreGlobalConst,

    Jump,
    PopJumpIfTrue,
    PopJumpIfFalse,
    JumpIfTrueOrPop,
    JumpIfFalseOrPop,

    GetIterStack,
    ForIter,

    ReturnValue,
    MakeFunction,
    CallFunction,

    ImportName,
    ImportFrom,
    ImportStar,

    BuildTuple,
    BuildList,
    BuildSet,
    BuildMap,
    StoreMap,

    UnaryPositive,
    UnaryNegative,
    UnaryInvert,
    UnaryNot,

    BinaryAdd,
    BinarySubtract,
    BinaryMultiply,
    BinaryMatMultiply,
    BinaryTrueDivide,
    BinaryFloorDivide,
    BinaryModulo,
    BinaryPower,
    BinaryLShift,
    BinaryRShift,
    BinaryAnd,
    BinaryOr,
    BinaryXor,

    BinaryEqual,
    BinaryNotEqual,
    BinaryLess,
    BinaryLessEqual,
    BinaryMore,
    BinaryMoreEqual,
    BinaryIs,
    BinaryIn,

    InplaceAdd,
    InplaceSubtract,
    InplaceMultiply,
    InplaceMatMultiply,
    InplaceTrueDivide,
    InplaceFloorDivide,
    InplaceModulo,
    InplacePower,
    InplaceLShift,
    InplaceRShift,
    InplaceAnd,
    InplaceOr,
    InplaceXor,
}

impl Opcode {
    /// Static operand-stack delta of this opcode.
    ///
    /// Returns `None` for opcodes whose effect depends on their operand
    /// (`CallFunction`, the sequence `Build*` family) or on which control-flow
    /// edge is taken (`ForIter`); those are computed at the emission site.
    #[must_use]
    pub fn stack_effect(self) -> Option<i16> {
        let effect = match self {
            Self::PopTop => -1,
            Self::DupTop => 1,

            Self::LoadConstNone
            | Self::LoadConstSmallInt
            | Self::LoadConstString
            | Self::LoadConstObj
            | Self::LoadName
            | Self::LoadGlobal
            | Self::LoadFastN
            | Self::LoadDeref => 1,

            // Pops the object, pushes the attribute.
            Self::LoadAttr => 0,

            Self::StoreName
            | Self::StoreGlobal
            | Self::StoreFastN
            | Self::StoreDeref
            | Self::StoreNameConst
            | Self::StoreGlobalConst => -1,

            // Pops the object and the value below it.
            Self::StoreAttr => -2,

            Self::Jump => 0,
            Self::PopJumpIfTrue | Self::PopJumpIfFalse => -1,
            // Fall-through pops the tested value; the jumping edge keeps it
            // as the expression result, arriving at the join at +1.
            Self::JumpIfTrueOrPop | Self::JumpIfFalseOrPop => -1,

            // Converts the iterable on top of the stack into the VM's
            // 4-slot inline iterator state.
            Self::GetIterStack => 3,
            Self::ForIter => return None,

            Self::ReturnValue => -1,
            Self::MakeFunction => 1,
            Self::CallFunction => return None,

            // Pops the import level and the fromlist, pushes the module.
            Self::ImportName => -1,
            // Peeks the module, pushes the attribute.
            Self::ImportFrom => 1,
            Self::ImportStar => -1,

            Self::BuildTuple | Self::BuildList | Self::BuildSet => return None,
            // Pushes an empty map; the operand is a size hint only.
            Self::BuildMap => 1,
            // Pops the key and the value below it.
            Self::StoreMap => -2,

            Self::UnaryPositive | Self::UnaryNegative | Self::UnaryInvert | Self::UnaryNot => 0,

            Self::BinaryAdd
            | Self::BinarySubtract
            | Self::BinaryMultiply
            | Self::BinaryMatMultiply
            | Self::BinaryTrueDivide
            | Self::BinaryFloorDivide
            | Self::BinaryModulo
            | Self::BinaryPower
            | Self::BinaryLShift
            | Self::BinaryRShift
            | Self::BinaryAnd
            | Self::BinaryOr
            | Self::BinaryXor => -1,

            Self::BinaryEqual
            | Self::BinaryNotEqual
            | Self::BinaryLess
            | Self::BinaryLessEqual
            | Self::BinaryMore
            | Self::BinaryMoreEqual
            | Self::BinaryIs
            | Self::BinaryIn => -1,

            Self::InplaceAdd
            | Self::InplaceSubtract
            | Self::InplaceMultiply
            | Self::InplaceMatMultiply
            | Self::InplaceTrueDivide
            | Self::InplaceFloorDivide
            | Self::InplaceModulo
            | Self::InplacePower
            | Self::InplaceLShift
            | Self::InplaceRShift
            | Self::InplaceAnd
            | Self::InplaceOr
            | Self::InplaceXor => -1,
        };
        Some(effect)
    }

    /// Number of operand bytes following the opcode byte.
    ///
    /// Used by disassemblers and tests to walk an instruction stream.
    #[must_use]
    pub fn operand_len(self) -> usize {
        match self {
            Self::LoadConstSmallInt => 4,

            Self::LoadConstString
            | Self::LoadConstObj
            | Self::LoadName
            | Self::LoadGlobal
            | Self::LoadFastN
            | Self::LoadDeref
            | Self::LoadAttr
            | Self::StoreName
            | Self::StoreGlobal
            | Self::StoreFastN
            | Self::StoreDeref
            | Self::StoreAttr
            | Self::StoreNameConst
            | Self::StoreGlobalConst
            | Self::MakeFunction
            | Self::ImportName
            | Self::ImportFrom
            | Self::BuildTuple
            | Self::BuildList
            | Self::BuildSet
            | Self::BuildMap => 2,

            Self::Jump
            | Self::PopJumpIfTrue
            | Self::PopJumpIfFalse
            | Self::JumpIfTrueOrPop
            | Self::JumpIfFalseOrPop
            | Self::ForIter => 2,

            Self::CallFunction => 2,

            _ => 0,
        }
    }
}
