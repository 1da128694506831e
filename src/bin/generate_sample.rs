//! Write a synthetic deaths-by-dose dataset in the source layout.
//!
//! Usage: `generate_sample [OUTPUT]` (default `sample_deaths.csv`).

use anyhow::{Context, Result};
use dose_dashboard::data::loader::DELIMITER;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Poisson sample by inversion; fine for the small means used here.
    fn poisson(&mut self, mean: f64) -> u64 {
        let limit = (-mean).exp();
        let mut k = 0;
        let mut p = self.next_f64();
        while p > limit {
            k += 1;
            p *= self.next_f64();
        }
        k
    }
}

/// Expected deaths per row: rises steeply with age, lower with more doses.
fn expected_deaths(age: u32, dose_rank: usize) -> f64 {
    let age_factor = (f64::from(age) / 18.0).exp() / 40.0;
    let protection = [1.0, 0.6, 0.25, 0.1][dose_rank];
    (age_factor * protection).min(30.0)
}

fn main() -> Result<()> {
    let output_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample_deaths.csv".to_string());
    let mut rng = SimpleRng::new(42);

    let dates = ["2022-01-24", "2022-01-25", "2022-01-26", "2022-01-27"];
    let sexes = ["K", "M"];
    let doses = ["brak dawki", "jedna_dawka", "pelna_dawka", "przypominajaca"];

    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_path(&output_path)
        .with_context(|| format!("creating {output_path}"))?;
    writer.write_record([
        "data_rap_zgonu",
        "plec",
        "wiek",
        "dawka_ost",
        "liczba_zaraportowanych_zgonow",
    ])?;

    let mut rows = 0usize;
    for date in &dates {
        for sex in &sexes {
            for age in 1..=100u32 {
                for (rank, dose) in doses.iter().enumerate() {
                    let deaths = rng.poisson(expected_deaths(age, rank));
                    if deaths == 0 {
                        continue;
                    }
                    writer.write_record([
                        date.to_string(),
                        sex.to_string(),
                        age.to_string(),
                        dose.to_string(),
                        deaths.to_string(),
                    ])?;
                    rows += 1;
                }
            }
        }
    }
    writer.flush().context("flushing output")?;

    println!("Wrote {rows} records to {output_path}");
    Ok(())
}
