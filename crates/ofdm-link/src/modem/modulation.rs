//! Subcarrier modulation schemes and constellation mapping.

use num_complex::Complex;
use std::f64::consts::TAU;

/// Per-subcarrier modulation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubcarrierModulation {
    Bpsk,
    Qpsk,
    Psk8,
    Apsk16,
    Apsk32,
    Apsk64,
    Apsk128,
    Apsk256,
}

impl SubcarrierModulation {
    /// All supported schemes, in bits-per-symbol order.
    pub const ALL: [Self; 8] = [
        Self::Bpsk,
        Self::Qpsk,
        Self::Psk8,
        Self::Apsk16,
        Self::Apsk32,
        Self::Apsk64,
        Self::Apsk128,
        Self::Apsk256,
    ];

    /// Parse a scheme name as used on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bpsk" => Some(Self::Bpsk),
            "qpsk" => Some(Self::Qpsk),
            "psk8" => Some(Self::Psk8),
            "apsk16" => Some(Self::Apsk16),
            "apsk32" => Some(Self::Apsk32),
            "apsk64" => Some(Self::Apsk64),
            "apsk128" => Some(Self::Apsk128),
            "apsk256" => Some(Self::Apsk256),
            _ => None,
        }
    }

    /// Scheme name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bpsk => "bpsk",
            Self::Qpsk => "qpsk",
            Self::Psk8 => "psk8",
            Self::Apsk16 => "apsk16",
            Self::Apsk32 => "apsk32",
            Self::Apsk64 => "apsk64",
            Self::Apsk128 => "apsk128",
            Self::Apsk256 => "apsk256",
        }
    }

    /// Bits carried by one subcarrier symbol.
    pub fn bits_per_symbol(self) -> u32 {
        match self {
            Self::Bpsk => 1,
            Self::Qpsk => 2,
            Self::Psk8 => 3,
            Self::Apsk16 => 4,
            Self::Apsk32 => 5,
            Self::Apsk64 => 6,
            Self::Apsk128 => 7,
            Self::Apsk256 => 8,
        }
    }

    /// Stable identifier carried in the frame header.
    pub fn id(self) -> u8 {
        self.bits_per_symbol() as u8 - 1
    }

    /// Inverse of [`Self::id`].
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// Constellation table for one modulation scheme.
///
/// PSK points are Gray-labeled around the circle; APSK points lie on
/// concentric rings with staggered phase offsets, normalized to unit
/// average energy. Demapping is a hard decision to the nearest point.
#[derive(Debug, Clone)]
pub struct Constellation {
    points: Vec<Complex<f32>>,
    bits: u32,
}

/// Ring sizes for the APSK constellations.
fn apsk_rings(scheme: SubcarrierModulation) -> &'static [usize] {
    match scheme {
        SubcarrierModulation::Apsk16 => &[4, 12],
        SubcarrierModulation::Apsk32 => &[4, 12, 16],
        SubcarrierModulation::Apsk64 => &[4, 12, 20, 28],
        SubcarrierModulation::Apsk128 => &[8, 16, 24, 32, 48],
        SubcarrierModulation::Apsk256 => &[4, 12, 20, 28, 36, 44, 52, 60],
        _ => unreachable!("not an APSK scheme"),
    }
}

fn psk_points(order: usize) -> Vec<Complex<f32>> {
    // Phase offset puts QPSK on the diagonals
    let offset = if order >= 4 { TAU / (2.0 * order as f64) } else { 0.0 };
    let mut points = vec![Complex::new(0.0, 0.0); order];
    for k in 0..order {
        let gray = k ^ (k >> 1);
        let angle = TAU * k as f64 / order as f64 + offset;
        points[gray] = Complex::new(angle.cos() as f32, angle.sin() as f32);
    }
    points
}

fn apsk_points(scheme: SubcarrierModulation) -> Vec<Complex<f32>> {
    let rings = apsk_rings(scheme);
    let total: usize = rings.iter().sum();
    let mut energy = 0.0f64;
    for (i, &count) in rings.iter().enumerate() {
        let radius = (i + 1) as f64;
        energy += count as f64 * radius * radius;
    }
    let scale = (total as f64 / energy).sqrt();
    let mut points = Vec::with_capacity(total);
    for (i, &count) in rings.iter().enumerate() {
        let radius = (i + 1) as f64 * scale;
        let stagger = if i % 2 == 1 { TAU / (2.0 * count as f64) } else { 0.0 };
        for k in 0..count {
            let angle = TAU * k as f64 / count as f64 + stagger;
            points.push(Complex::new(
                (radius * angle.cos()) as f32,
                (radius * angle.sin()) as f32,
            ));
        }
    }
    points
}

impl Constellation {
    /// Build the constellation table for a scheme.
    pub fn new(scheme: SubcarrierModulation) -> Self {
        let bits = scheme.bits_per_symbol();
        let points = match scheme {
            SubcarrierModulation::Bpsk => vec![Complex::new(1.0, 0.0), Complex::new(-1.0, 0.0)],
            SubcarrierModulation::Qpsk => psk_points(4),
            SubcarrierModulation::Psk8 => psk_points(8),
            _ => apsk_points(scheme),
        };
        debug_assert_eq!(points.len(), 1 << bits);
        Self { points, bits }
    }

    /// Bits carried per symbol.
    pub fn bits_per_symbol(&self) -> u32 {
        self.bits
    }

    /// Map a symbol index to its constellation point.
    pub fn map(&self, index: usize) -> Complex<f32> {
        self.points[index]
    }

    /// Hard-decision demap to the nearest constellation point.
    pub fn demap(&self, sample: Complex<f32>) -> usize {
        let mut best = 0;
        let mut best_dist = f32::MAX;
        for (i, p) in self.points.iter().enumerate() {
            let dist = (sample - p).norm_sqr();
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scheme in SubcarrierModulation::ALL {
            assert_eq!(SubcarrierModulation::from_name(scheme.name()), Some(scheme));
            assert_eq!(SubcarrierModulation::from_id(scheme.id()), Some(scheme));
        }
        assert_eq!(SubcarrierModulation::from_name("gmsk"), None);
        assert_eq!(SubcarrierModulation::from_id(8), None);
    }

    #[test]
    fn test_map_demap_identity() {
        for scheme in SubcarrierModulation::ALL {
            let c = Constellation::new(scheme);
            for index in 0..(1usize << c.bits_per_symbol()) {
                assert_eq!(c.demap(c.map(index)), index, "{}/{index}", scheme.name());
            }
        }
    }

    #[test]
    fn test_unit_average_energy() {
        for scheme in SubcarrierModulation::ALL {
            let c = Constellation::new(scheme);
            let n = 1usize << c.bits_per_symbol();
            let energy: f32 = (0..n).map(|i| c.map(i).norm_sqr()).sum::<f32>() / n as f32;
            assert!((energy - 1.0).abs() < 0.01, "{}: {energy}", scheme.name());
        }
    }

    #[test]
    fn test_demap_tolerates_noise() {
        let c = Constellation::new(SubcarrierModulation::Qpsk);
        for index in 0..4 {
            let noisy = c.map(index) + Complex::new(0.1, -0.1);
            assert_eq!(c.demap(noisy), index);
        }
    }
}
