#[cfg(test)]
mod proptest_latch {
    use crate::latch::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Post(f64),
        Drain,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-1.0f64..=1.0).prop_map(Op::Post),
            Just(Op::Drain),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        // Property: each drain yields the last post since the previous drain, or nothing
        #[test]
        fn drain_yields_last_post_in_window(ops in prop::collection::vec(op(), 1..64)) {
            let cell = LatchCell::<f64>::new();
            let mut window: Option<f64> = None;

            for op in ops {
                match op {
                    Op::Post(v) => {
                        cell.post(v);
                        window = Some(v);
                    }
                    Op::Drain => {
                        let drained = cell.drain();
                        prop_assert_eq!(drained, window.take());
                    }
                }
            }
        }

        // Property: a value is handed out at most once
        #[test]
        fn back_to_back_drains_yield_at_most_once(v in any::<f64>()) {
            let cell = LatchCell::<f64>::new();
            cell.post(v);
            let first = cell.drain();
            prop_assert!(first.is_some());
            prop_assert_eq!(cell.drain(), None);
            prop_assert!(!cell.is_dirty());
        }

        // Property: every finite value survives the cell bit-for-bit
        #[test]
        fn finite_values_are_preserved(v in prop::num::f64::NORMAL | prop::num::f64::ZERO | prop::num::f64::SUBNORMAL) {
            let cell = LatchCell::<f64>::new();
            cell.post(v);
            let drained = cell.drain();
            prop_assert_eq!(drained.map(f64::to_bits), Some(v.to_bits()));
        }

        // Property: flag channels keep the last level, true or false
        #[test]
        fn flags_coalesce_to_last_level(levels in prop::collection::vec(any::<bool>(), 1..16)) {
            let latch = CommandLatch::new();
            for level in &levels {
                latch.post(crate::channel::Command::Stop(*level));
            }
            let pending = latch.drain_all();
            prop_assert_eq!(pending.stop, levels.last().copied());
            prop_assert!(pending.speed.is_none());
        }
    }
}
