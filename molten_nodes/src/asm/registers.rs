//! General-purpose register names for the assembly sub-parser.
//!
//! Only the name → (register, width) mapping is needed here: the parser
//! tracks register contents symbolically, so the hardware encoding is
//! irrelevant.

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Gpr {
    /// Parse an AT&T register name (without the `%` sigil) into the
    /// register and its access width in bits.
    pub fn parse(name: &str) -> Option<(Gpr, u32)> {
        use Gpr::*;
        // 64/32/16-bit legacy names.
        const LEGACY: &[(&str, Gpr)] = &[
            ("ax", Rax),
            ("cx", Rcx),
            ("dx", Rdx),
            ("bx", Rbx),
            ("sp", Rsp),
            ("bp", Rbp),
            ("si", Rsi),
            ("di", Rdi),
        ];
        if let Some(rest) = name.strip_prefix('r') {
            // r8..r15 with optional d/w/b suffix.
            if let Some((reg, bits)) = parse_numbered(rest) {
                return Some((reg, bits));
            }
            if let Some(&(_, reg)) = LEGACY.iter().find(|(n, _)| *n == rest) {
                return Some((reg, 64));
            }
        }
        if let Some(rest) = name.strip_prefix('e') {
            if let Some(&(_, reg)) = LEGACY.iter().find(|(n, _)| *n == rest) {
                return Some((reg, 32));
            }
        }
        if let Some(&(_, reg)) = LEGACY.iter().find(|(n, _)| *n == name) {
            return Some((reg, 16));
        }
        // 8-bit: al, cl, dl, bl (high-byte forms are outside the grammar).
        match name {
            "al" => Some((Rax, 8)),
            "cl" => Some((Rcx, 8)),
            "dl" => Some((Rdx, 8)),
            "bl" => Some((Rbx, 8)),
            _ => None,
        }
    }
}

fn parse_numbered(rest: &str) -> Option<(Gpr, u32)> {
    use Gpr::*;
    let (digits, bits) = match rest.as_bytes().last() {
        Some(b'd') => (&rest[..rest.len() - 1], 32),
        Some(b'w') => (&rest[..rest.len() - 1], 16),
        Some(b'b') => (&rest[..rest.len() - 1], 8),
        _ => (rest, 64),
    };
    let n: u32 = digits.parse().ok()?;
    let reg = match n {
        8 => R8,
        9 => R9,
        10 => R10,
        11 => R11,
        12 => R12,
        13 => R13,
        14 => R14,
        15 => R15,
        _ => return None,
    };
    Some((reg, bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_widths() {
        assert_eq!(Gpr::parse("rax"), Some((Gpr::Rax, 64)));
        assert_eq!(Gpr::parse("eax"), Some((Gpr::Rax, 32)));
        assert_eq!(Gpr::parse("ax"), Some((Gpr::Rax, 16)));
        assert_eq!(Gpr::parse("al"), Some((Gpr::Rax, 8)));
        assert_eq!(Gpr::parse("rdi"), Some((Gpr::Rdi, 64)));
        assert_eq!(Gpr::parse("r10"), Some((Gpr::R10, 64)));
        assert_eq!(Gpr::parse("r10d"), Some((Gpr::R10, 32)));
        assert_eq!(Gpr::parse("xmm0"), None);
        assert_eq!(Gpr::parse("cr0"), None);
    }
}
