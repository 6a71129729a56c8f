use zax_isaz80::{Operand, Reg16};

/// Abstract stack fact at one program point. Copied, never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlowState {
    pub reachable: bool,
    /// Net SP change since function entry; pushes make it negative.
    pub delta: i32,
    pub valid: bool,
    /// SP was loaded from a non-constant source. Survives every merge.
    pub tainted: bool,
}

impl FlowState {
    pub fn entry() -> Self {
        Self {
            reachable: true,
            delta: 0,
            valid: true,
            tainted: false,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::entry()
        }
    }

    /// Reachable with no usable predecessor information.
    pub fn unknown() -> Self {
        Self {
            valid: false,
            ..Self::entry()
        }
    }

    pub fn adjust(&mut self, amount: i32) {
        if self.valid {
            self.delta += amount;
        }
    }

    pub fn invalidate(&mut self, tainted: bool) {
        self.valid = false;
        self.delta = 0;
        self.tainted |= tainted;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinIssue {
    Mismatch { left: i32, right: i32 },
    Unknown,
}

pub(crate) fn join(
    left: FlowState,
    right: FlowState,
    uses_slots: bool,
) -> (FlowState, Option<JoinIssue>) {
    if !left.reachable {
        return (right, None);
    }
    if !right.reachable {
        return (left, None);
    }
    if left.valid && right.valid {
        if left.delta == right.delta {
            return (left, None);
        }
        let issue = JoinIssue::Mismatch {
            left: left.delta,
            right: right.delta,
        };
        return (left, Some(issue));
    }

    let mut merged = FlowState::unknown();
    if left.tainted || right.tainted {
        merged.tainted = true;
        return (merged, None);
    }
    let issue = uses_slots.then_some(JoinIssue::Unknown);
    (merged, issue)
}

pub(crate) fn apply_effect(state: &mut FlowState, mnemonic: &str, operands: &[Operand]) {
    match (mnemonic, operands) {
        ("push", _) => state.adjust(-2),
        ("pop", _) => state.adjust(2),
        ("inc", [Operand::Reg16(Reg16::Sp)]) => state.adjust(1),
        ("dec", [Operand::Reg16(Reg16::Sp)]) => state.adjust(-1),
        ("ld", [Operand::Reg16(Reg16::Sp), Operand::Imm(_)]) => state.invalidate(false),
        ("ld", [Operand::Reg16(Reg16::Sp), _]) => state.invalidate(true),
        ("jp" | "jr", [_]) | ("ret", []) | ("reti" | "retn", _) => {
            state.reachable = false;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(delta: i32) -> FlowState {
        FlowState {
            delta,
            ..FlowState::entry()
        }
    }

    #[test]
    fn push_and_pop_balance() {
        let mut state = FlowState::entry();
        apply_effect(&mut state, "push", &[Operand::Reg16(Reg16::Hl)]);
        apply_effect(&mut state, "dec", &[Operand::Reg16(Reg16::Sp)]);
        assert_eq!(state.delta, -3);
        apply_effect(&mut state, "inc", &[Operand::Reg16(Reg16::Sp)]);
        apply_effect(&mut state, "pop", &[Operand::Reg16(Reg16::Hl)]);
        assert_eq!(state, FlowState::entry());
    }

    #[test]
    fn constant_sp_load_invalidates_without_taint() {
        let mut state = FlowState::entry();
        apply_effect(&mut state, "ld", &[Operand::Reg16(Reg16::Sp), Operand::Imm(0xFF00)]);
        assert!(!state.valid);
        assert!(!state.tainted);

        apply_effect(&mut state, "ld", &[Operand::Reg16(Reg16::Sp), Operand::Reg16(Reg16::Hl)]);
        assert!(state.tainted);
    }

    #[test]
    fn unconditional_transfers_end_reachability() {
        for (mnemonic, operands) in [
            ("jp", vec![Operand::Imm(0)]),
            ("jr", vec![Operand::Imm(0)]),
            ("jp", vec![Operand::Indirect(Reg16::Hl)]),
            ("ret", vec![]),
            ("reti", vec![]),
        ] {
            let mut state = FlowState::entry();
            apply_effect(&mut state, mnemonic, &operands);
            assert!(!state.reachable, "{mnemonic}");
        }

        let mut state = FlowState::entry();
        apply_effect(&mut state, "jp", &[Operand::Cond(zax_isaz80::Condition::Z), Operand::Imm(0)]);
        assert!(state.reachable);
    }

    #[test]
    fn join_drops_unreachable_side() {
        let (merged, issue) = join(FlowState::unreachable(), at(-2), true);
        assert_eq!(merged, at(-2));
        assert_eq!(issue, None);
    }

    #[test]
    fn join_reports_depth_mismatch() {
        let (_, issue) = join(at(0), at(-2), false);
        assert_eq!(issue, Some(JoinIssue::Mismatch { left: 0, right: -2 }));
    }

    #[test]
    fn taint_propagates_silently() {
        let mut tainted = FlowState::entry();
        tainted.invalidate(true);
        let (merged, issue) = join(at(0), tainted, true);
        assert!(merged.tainted);
        assert!(!merged.valid);
        assert_eq!(issue, None);
    }

    #[test]
    fn unknown_state_is_flagged_only_with_slots() {
        assert_eq!(join(at(0), FlowState::unknown(), false).1, None);
        assert_eq!(
            join(at(0), FlowState::unknown(), true).1,
            Some(JoinIssue::Unknown)
        );
    }
}
