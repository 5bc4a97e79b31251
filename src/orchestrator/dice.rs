// src/orchestrator/dice.rs
// `roll_dice` tool semantics (spec §4.6/§8): deterministic *local* computation
// (no model round-trip), not a deterministic PRNG - randomness comes from
// `rand`, same as the rest of the crate's key/jitter selection.

use rand::Rng;

pub struct RollOutcome {
    pub display: String,
    pub total: i64,
    pub rolls: Vec<String>,
}

/// Rolls `count` dice of `die_type` (a numeric string for a uniform
/// `[1..=N]` die, or `"F"` for a Fudge die in `{-1, 0, +1}`), sums them with
/// `modifier`, and renders the `"NdX±M = total { rolls }"` display string.
pub fn roll(count: u32, die_type: &str, modifier: i32, rng: &mut impl Rng) -> RollOutcome {
    let count = count.max(1);

    let (rolls, display_rolls): (Vec<i64>, Vec<String>) = if die_type.eq_ignore_ascii_case("f") {
        (0..count)
            .map(|_| {
                let v = rng.gen_range(-1..=1);
                let symbol = match v {
                    -1 => "-",
                    1 => "+",
                    _ => " ",
                };
                (v as i64, symbol.to_string())
            })
            .unzip()
    } else {
        let sides: i64 = die_type.parse().unwrap_or(20).max(1);
        (0..count)
            .map(|_| {
                let v = rng.gen_range(1..=sides);
                (v, v.to_string())
            })
            .unzip()
    };

    let total: i64 = rolls.iter().sum::<i64>() + modifier as i64;
    let modifier_str = match modifier.cmp(&0) {
        std::cmp::Ordering::Greater => format!("+{modifier}"),
        std::cmp::Ordering::Less => modifier.to_string(),
        std::cmp::Ordering::Equal => String::new(),
    };

    let display = format!("{count}d{die_type}{modifier_str} = {total} {{ {} }}", display_rolls.join(" "));

    RollOutcome { display, total, rolls: display_rolls }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn numeric_die_total_is_in_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let outcome = roll(1, "20", 0, &mut rng);
        assert!(outcome.total >= 1 && outcome.total <= 20);
    }

    #[test]
    fn modifier_is_added_to_total() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let plain = roll(1, "20", 0, &mut rng);
        let mut rng2 = rand::rngs::StdRng::seed_from_u64(2);
        let modified = roll(1, "20", 2, &mut rng2);
        assert_eq!(modified.total, plain.total + 2);
    }

    #[test]
    fn display_matches_expected_format() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let outcome = roll(1, "20", 2, &mut rng);
        let re = regex::Regex::new(r"^1d20\+2 = \d+ \{ \d+ \}$").unwrap();
        assert!(re.is_match(&outcome.display), "{}", outcome.display);
    }

    #[test]
    fn fudge_die_total_is_bounded() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let outcome = roll(4, "F", 0, &mut rng);
        assert!(outcome.total >= -4 && outcome.total <= 4);
        assert_eq!(outcome.rolls.len(), 4);
    }
}
