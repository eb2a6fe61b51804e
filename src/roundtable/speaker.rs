use std::collections::HashMap;

use rand::Rng;

/// Weight floor so no eligible speaker is ever fully starved.
const MIN_WEIGHT: f64 = 0.1;
const JITTER: f64 = 0.2;

/// Affinity-weighted speaker draw.
///
/// Weight per candidate: `1.0 + 0.6 × affinity(candidate, last)` minus
/// `0.3 × times_spoken`, plus uniform jitter in `±0.2`, floored at 0.1.
/// The immediately-preceding speaker gets weight 0 and so is never drawn
/// twice in a row.
pub fn select_next_speaker<R: Rng>(
    participants: &[String],
    last_speaker: Option<&str>,
    times_spoken: &HashMap<String, u32>,
    affinity_to_last: &HashMap<String, f64>,
    rng: &mut R,
) -> Option<String> {
    let weights: Vec<f64> = participants
        .iter()
        .map(|p| {
            if Some(p.as_str()) == last_speaker {
                return 0.0;
            }
            let mut weight = 1.0;
            if last_speaker.is_some() {
                weight += 0.6 * affinity_to_last.get(p).copied().unwrap_or(0.5);
            }
            weight -= 0.3 * f64::from(times_spoken.get(p).copied().unwrap_or(0));
            weight += rng.gen_range(-JITTER..=JITTER);
            weight.max(MIN_WEIGHT)
        })
        .collect();

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let mut roll = rng.gen_range(0.0..total);
    for (participant, weight) in participants.iter().zip(&weights) {
        if roll < *weight {
            return Some(participant.clone());
        }
        roll -= weight;
    }
    // Floating point remainder lands on the last non-zero weight.
    participants
        .iter()
        .zip(&weights)
        .rev()
        .find(|(_, w)| **w > 0.0)
        .map(|(p, _)| p.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn participants() -> Vec<String> {
        vec!["ava".to_string(), "kai".to_string(), "noa".to_string()]
    }

    #[test]
    fn test_last_speaker_is_never_redrawn() {
        let participants = participants();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let picked = select_next_speaker(
                &participants,
                Some("kai"),
                &HashMap::new(),
                &HashMap::new(),
                &mut rng,
            )
            .unwrap();
            assert_ne!(picked, "kai");
        }
    }

    #[test]
    fn test_seeded_draw_is_reproducible() {
        let participants = participants();
        let draw = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            select_next_speaker(&participants, None, &HashMap::new(), &HashMap::new(), &mut rng)
                .unwrap()
        };
        assert_eq!(draw(42), draw(42));
    }

    #[test]
    fn test_high_affinity_is_favored() {
        let participants = participants();
        let mut affinity = HashMap::new();
        affinity.insert("ava".to_string(), 0.95);
        affinity.insert("noa".to_string(), 0.10);

        let mut rng = StdRng::seed_from_u64(9);
        let mut ava = 0;
        let mut noa = 0;
        for _ in 0..500 {
            match select_next_speaker(
                &participants,
                Some("kai"),
                &HashMap::new(),
                &affinity,
                &mut rng,
            )
            .unwrap()
            .as_str()
            {
                "ava" => ava += 1,
                "noa" => noa += 1,
                _ => {}
            }
        }
        assert!(ava > noa);
    }

    #[test]
    fn test_heavy_talkers_are_damped() {
        let participants = participants();
        let mut spoken = HashMap::new();
        spoken.insert("ava".to_string(), 10);

        let mut rng = StdRng::seed_from_u64(5);
        let mut ava = 0;
        for _ in 0..500 {
            if select_next_speaker(&participants, None, &spoken, &HashMap::new(), &mut rng)
                .unwrap()
                == "ava"
            {
                ava += 1;
            }
        }
        // Floored weight still gives a sliver of airtime, not parity.
        assert!(ava < 100);
    }

    #[test]
    fn test_empty_participants_yield_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_next_speaker(&[], None, &HashMap::new(), &HashMap::new(), &mut rng)
            .is_none());
    }
}
