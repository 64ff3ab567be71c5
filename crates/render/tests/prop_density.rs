use cellfield_common::{Cell, CellCoord};
use cellfield_render::{Candidate, DensityConfig, DensitySampler, LodTier, sample_every_nth};
use glam::Vec3;
use proptest::prelude::*;

proptest! {
    #[test]
    fn every_nth_keeps_ceil_of_len_over_step(len in 0usize..500, ratio in 0.01f32..1.0) {
        let items: Vec<usize> = (0..len).collect();
        let step = ((1.0 / ratio).round() as usize).max(1);
        let kept = sample_every_nth(items, ratio);
        prop_assert_eq!(kept.len(), len.div_ceil(step));
        prop_assert!(kept.windows(2).all(|w| w[1] - w[0] == step));
    }

    #[test]
    fn sampled_output_respects_budget(
        distances in prop::collection::vec(0.0f32..200.0, 1..400),
        budget in 1usize..300,
    ) {
        let cells: Vec<Cell> = (0..distances.len() as i32)
            .map(|i| Cell::new(CellCoord::new(i, 0, 0), if i % 3 == 0 { "agua" } else { "roca" }))
            .collect();
        let input: Vec<Candidate<'_>> = cells
            .iter()
            .zip(&distances)
            .map(|(cell, d)| Candidate { cell, center: Vec3::ZERO, distance_sq: Some(d * d), tier: LodTier::Near })
            .collect();
        let n = input.len();
        let (out, stats) = DensitySampler::new(DensityConfig::default()).sample(input, budget);
        prop_assert!(out.len() <= budget);
        prop_assert!(out.len() <= n);
        prop_assert_eq!(stats.output, out.len());
    }
}
