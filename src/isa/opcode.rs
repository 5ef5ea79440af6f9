// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

/// The AArch64 opcodes the pass reasons about. Operand order follows the
/// LLVM layout: def operands first (writeback forms list the written base
/// register before the transfer registers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Invalid = 0,

    /// Call-frame information directive, metadata only.
    Cfi,

    /// Register liveness marker, never emitted.
    Kill,

    //
    // Arithmetic & logic
    //

    AddXri,
    AddWri,
    AddXrs,
    SubXri,
    SubWri,
    SubXrs,
    AndXri,
    EorXrs,
    OrrXrs,
    MAddX,
    MovZ,
    MovK,
    LslXri,
    LsrXri,
    AsrXri,
    RorXri,
    FMovSi,

    //
    // Loads & stores
    //

    LdrXui,
    LdrWui,
    LdrHui,
    LdrBui,
    LdrQui,
    LdurXi,
    LdrXl,
    StrXui,
    StrWui,
    StrQui,
    SturXi,
    LdpXi,
    LdpWi,
    LdpQi,
    StpXi,
    StpWi,
    StpQi,
    StpXpre,
    LdpXpost,

    //
    // PC-relative address generation
    //

    Adr,
    Adrp,

    //
    // Control flow
    //

    B,
    Br,
    BCond,
    Cbz,
    Cbnz,
    Bl,
    Blr,
    Ret,
}

impl Opcode {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Invalid => "INVALID",
            Self::Cfi => "CFI_INSTRUCTION",
            Self::Kill => "KILL",
            Self::AddXri => "ADDXri",
            Self::AddWri => "ADDWri",
            Self::AddXrs => "ADDXrs",
            Self::SubXri => "SUBXri",
            Self::SubWri => "SUBWri",
            Self::SubXrs => "SUBXrs",
            Self::AndXri => "ANDXri",
            Self::EorXrs => "EORXrs",
            Self::OrrXrs => "ORRXrs",
            Self::MAddX => "MADDXrrr",
            Self::MovZ => "MOVZXi",
            Self::MovK => "MOVKXi",
            Self::LslXri => "LSLXri",
            Self::LsrXri => "LSRXri",
            Self::AsrXri => "ASRXri",
            Self::RorXri => "RORXri",
            Self::FMovSi => "FMOVSi",
            Self::LdrXui => "LDRXui",
            Self::LdrWui => "LDRWui",
            Self::LdrHui => "LDRHHui",
            Self::LdrBui => "LDRBBui",
            Self::LdrQui => "LDRQui",
            Self::LdurXi => "LDURXi",
            Self::LdrXl => "LDRXl",
            Self::StrXui => "STRXui",
            Self::StrWui => "STRWui",
            Self::StrQui => "STRQui",
            Self::SturXi => "STURXi",
            Self::LdpXi => "LDPXi",
            Self::LdpWi => "LDPWi",
            Self::LdpQi => "LDPQi",
            Self::StpXi => "STPXi",
            Self::StpWi => "STPWi",
            Self::StpQi => "STPQi",
            Self::StpXpre => "STPXpre",
            Self::LdpXpost => "LDPXpost",
            Self::Adr => "ADR",
            Self::Adrp => "ADRP",
            Self::B => "B",
            Self::Br => "BR",
            Self::BCond => "Bcc",
            Self::Cbz => "CBZX",
            Self::Cbnz => "CBNZX",
            Self::Bl => "BL",
            Self::Blr => "BLR",
            Self::Ret => "RET",
        }
    }

    #[must_use]
    pub const fn is_pseudo(&self) -> bool {
        matches!(self, Self::Kill)
    }

    #[must_use]
    pub const fn is_cfi(&self) -> bool {
        matches!(self, Self::Cfi)
    }

    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(self, Self::Bl | Self::Blr)
    }

    #[must_use]
    pub const fn is_indirect_call(&self) -> bool {
        matches!(self, Self::Blr)
    }

    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(self, Self::B | Self::Br | Self::BCond | Self::Cbz | Self::Cbnz)
    }

    #[must_use]
    pub const fn is_unconditional_branch(&self) -> bool {
        matches!(self, Self::B | Self::Br)
    }

    #[must_use]
    pub const fn is_return(&self) -> bool {
        matches!(self, Self::Ret)
    }

    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        self.is_branch() || self.is_return()
    }

    /// The canonical frame push: `stp r1, r2, [sp, #-16]!`.
    #[must_use]
    pub const fn is_push(&self) -> bool {
        matches!(self, Self::StpXpre)
    }

    /// The canonical frame pop: `ldp r1, r2, [sp], #16`.
    #[must_use]
    pub const fn is_pop(&self) -> bool {
        matches!(self, Self::LdpXpost)
    }

    #[must_use]
    pub const fn may_load(&self) -> bool {
        matches!(
            self,
            Self::LdrXui
                | Self::LdrWui
                | Self::LdrHui
                | Self::LdrBui
                | Self::LdrQui
                | Self::LdurXi
                | Self::LdrXl
                | Self::LdpXi
                | Self::LdpWi
                | Self::LdpQi
                | Self::LdpXpost
        )
    }

    #[must_use]
    pub const fn may_store(&self) -> bool {
        matches!(
            self,
            Self::StrXui
                | Self::StrWui
                | Self::StrQui
                | Self::SturXi
                | Self::StpXi
                | Self::StpWi
                | Self::StpQi
                | Self::StpXpre
        )
    }

    /// ADR, ADRP and literal-pool loads encode a PC-relative address, so a
    /// copy of them is only correct at the original location.
    #[must_use]
    pub const fn is_pc_relative(&self) -> bool {
        matches!(self, Self::Adr | Self::Adrp | Self::LdrXl)
    }

    #[must_use]
    pub const fn is_add_sub(&self) -> bool {
        matches!(
            self,
            Self::AddXri | Self::AddWri | Self::AddXrs | Self::SubXri | Self::SubWri | Self::SubXrs
        )
    }

    /// Constant-shift instructions, whose amount operand tolerates a small
    /// difference when matching.
    #[must_use]
    pub const fn is_shift(&self) -> bool {
        matches!(self, Self::LslXri | Self::LsrXri | Self::AsrXri | Self::RorXri)
    }

    /// How many leading operands are defs.
    #[must_use]
    pub const fn num_defs(&self) -> u8 {
        match self {
            Self::Invalid | Self::Cfi | Self::Kill => 0,

            Self::AddXri
            | Self::AddWri
            | Self::AddXrs
            | Self::SubXri
            | Self::SubWri
            | Self::SubXrs
            | Self::AndXri
            | Self::EorXrs
            | Self::OrrXrs
            | Self::MAddX
            | Self::MovZ
            | Self::MovK
            | Self::LslXri
            | Self::LsrXri
            | Self::AsrXri
            | Self::RorXri
            | Self::FMovSi
            | Self::Adr
            | Self::Adrp => 1,

            Self::LdrXui
            | Self::LdrWui
            | Self::LdrHui
            | Self::LdrBui
            | Self::LdrQui
            | Self::LdurXi
            | Self::LdrXl => 1,

            Self::LdpXi | Self::LdpWi | Self::LdpQi => 2,

            // Writeback base, then the two loaded registers.
            Self::LdpXpost => 3,

            // Writeback base only.
            Self::StpXpre => 1,

            Self::StrXui
            | Self::StrWui
            | Self::StrQui
            | Self::SturXi
            | Self::StpXi
            | Self::StpWi
            | Self::StpQi => 0,

            Self::B | Self::Br | Self::BCond | Self::Cbz | Self::Cbnz | Self::Bl | Self::Blr
            | Self::Ret => 0,
        }
    }

    /// The unit, in bytes, of a scaled immediate offset. Unscaled and
    /// unrecognised forms fall back to 1.
    #[must_use]
    pub const fn stack_offset_scale(&self) -> i64 {
        match self {
            Self::LdpXi | Self::StpXi => 8,
            Self::LdpWi | Self::StpWi => 4,
            Self::LdpQi | Self::StpQi => 16,

            Self::LdrXui | Self::StrXui => 8,
            Self::LdrWui | Self::StrWui => 4,
            Self::LdrQui | Self::StrQui => 16,
            Self::LdrHui => 2,
            Self::LdrBui => 1,

            Self::LdurXi | Self::SturXi => 1,

            _ => 1,
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
