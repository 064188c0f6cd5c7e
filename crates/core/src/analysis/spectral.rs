//! Spectral and waveform descriptors computed from byte snapshots.

use std::f32::consts::PI;

/// Number of cepstral coefficients reported in the feature vector.
pub const CEPSTRAL_COEFFS: usize = 13;
const MEL_BANDS: usize = 26;
const ROLLOFF_FRACTION: f32 = 0.85;
const CHROMA_MIN_HZ: f32 = 27.5;
const CHROMA_MAX_HZ: f32 = 5_000.0;

/// Undoes the byte mapping of an analysis node. Byte 0 is treated as silence.
pub fn magnitudes_from_bytes(bytes: &[u8], (min_db, max_db): (f32, f32)) -> Vec<f32> {
    bytes
        .iter()
        .map(|&b| {
            if b == 0 {
                0.0
            } else {
                let db = min_db + f32::from(b) / 255.0 * (max_db - min_db);
                10f32.powf(db / 20.0)
            }
        })
        .collect()
}

/// Magnitude-weighted mean frequency in Hz.
pub fn spectral_centroid(magnitudes: &[f32], bin_hz: f32) -> f32 {
    let (weighted, total) = magnitudes
        .iter()
        .enumerate()
        .fold((0.0f32, 0.0f32), |(w, t), (i, &m)| (w + m * i as f32 * bin_hz, t + m));
    if total <= f32::EPSILON {
        0.0
    } else {
        weighted / total
    }
}

/// Frequency below which 85% of the spectral magnitude lies.
pub fn spectral_rolloff(magnitudes: &[f32], bin_hz: f32) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= f32::EPSILON {
        return 0.0;
    }
    let target = total * ROLLOFF_FRACTION;
    let mut acc = 0.0;
    for (i, &m) in magnitudes.iter().enumerate() {
        acc += m;
        if acc >= target {
            return i as f32 * bin_hz;
        }
    }
    (magnitudes.len().saturating_sub(1)) as f32 * bin_hz
}

/// Fraction of adjacent waveform samples that change sign around the 128
/// midpoint.
pub fn zero_crossing_rate(waveform: &[u8]) -> f32 {
    if waveform.len() < 2 {
        return 0.0;
    }
    let crossings = waveform
        .windows(2)
        .filter(|pair| (pair[0] >= 128) != (pair[1] >= 128))
        .count();
    crossings as f32 / (waveform.len() - 1) as f32
}

/// Root-mean-square of a byte waveform, in `[0, 1]`.
pub fn waveform_rms(waveform: &[u8]) -> f32 {
    if waveform.is_empty() {
        return 0.0;
    }
    let sum: f32 = waveform
        .iter()
        .map(|&b| {
            let x = (f32::from(b) - 128.0) / 128.0;
            x * x
        })
        .sum();
    (sum / waveform.len() as f32).sqrt().clamp(0.0, 1.0)
}

/// Mel-frequency cepstral coefficients of one spectrum: triangular mel
/// filterbank over power, log scaled in dB, then an orthonormal DCT-II.
pub fn mel_cepstrum(magnitudes: &[f32], sample_rate: f32) -> [f32; CEPSTRAL_COEFFS] {
    let mut coeffs = [0.0f32; CEPSTRAL_COEFFS];
    let bins = magnitudes.len();
    if bins < 4 || sample_rate <= 0.0 {
        return coeffs;
    }
    let filters = mel_filterbank(bins, sample_rate, MEL_BANDS);

    let log_energies: Vec<f32> = filters
        .iter()
        .map(|taps| {
            let energy: f32 = taps.iter().map(|&(i, w)| magnitudes[i] * magnitudes[i] * w).sum();
            10.0 * energy.max(1e-10).log10()
        })
        .collect();

    let n = log_energies.len() as f32;
    for (k, coeff) in coeffs.iter_mut().enumerate() {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        *coeff = scale
            * log_energies
                .iter()
                .enumerate()
                .map(|(m, &e)| e * (PI * k as f32 * (m as f32 + 0.5) / n).cos())
                .sum::<f32>();
    }
    coeffs
}

/// Energy per pitch class, C first.
pub fn chroma(magnitudes: &[f32], bin_hz: f32) -> [f32; 12] {
    let mut classes = [0.0f32; 12];
    for (i, &m) in magnitudes.iter().enumerate().skip(1) {
        let hz = i as f32 * bin_hz;
        if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&hz) {
            continue;
        }
        let midi = 69.0 + 12.0 * (hz / 440.0).log2();
        let class = (midi.round() as i32).rem_euclid(12) as usize;
        classes[class] += m * m;
    }
    classes
}

#[inline]
pub fn hz_to_mel(f: f32) -> f32 {
    2595.0 * (1.0 + f / 700.0).log10()
}

#[inline]
pub fn mel_to_hz(m: f32) -> f32 {
    700.0 * (10f32.powf(m / 2595.0) - 1.0)
}

/// Triangular filters as `(bin, weight)` taps over `bins` spectrum bins.
fn mel_filterbank(bins: usize, sample_rate: f32, bands: usize) -> Vec<Vec<(usize, f32)>> {
    let nyquist = sample_rate * 0.5;
    let hz_per_bin = nyquist / bins as f32;
    let mmin = hz_to_mel(0.0);
    let mmax = hz_to_mel(nyquist);

    let mut points: Vec<usize> = (0..bands + 2)
        .map(|i| {
            let mel = mmin + i as f32 * (mmax - mmin) / (bands as f32 + 1.0);
            ((mel_to_hz(mel) / hz_per_bin).round() as usize).min(bins - 1)
        })
        .collect();
    for i in 1..points.len() {
        if points[i] <= points[i - 1] {
            points[i] = (points[i - 1] + 1).min(bins - 1);
        }
    }

    (0..bands)
        .map(|b| {
            let (l, c, r) = (points[b], points[b + 1], points[b + 2]);
            let mut taps = Vec::new();
            for i in l..c {
                taps.push((i, (i - l) as f32 / (c - l).max(1) as f32));
            }
            for i in c..=r {
                let w = if r == c { 1.0 } else { 1.0 - (i - c) as f32 / (r - c) as f32 };
                taps.push((i, w));
            }
            taps
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_and_rolloff_of_a_single_bin() {
        let mut mags = vec![0.0f32; 64];
        mags[10] = 1.0;
        assert_eq!(spectral_centroid(&mags, 20.0), 200.0);
        assert_eq!(spectral_rolloff(&mags, 20.0), 200.0);
    }

    #[test]
    fn silent_spectra_report_zero() {
        let mags = vec![0.0f32; 64];
        assert_eq!(spectral_centroid(&mags, 20.0), 0.0);
        assert_eq!(spectral_rolloff(&mags, 20.0), 0.0);
    }

    #[test]
    fn zero_crossings_of_an_alternating_wave() {
        let wave: Vec<u8> = (0..9).map(|i| if i % 2 == 0 { 200 } else { 50 }).collect();
        assert_eq!(zero_crossing_rate(&wave), 1.0);
        assert_eq!(zero_crossing_rate(&[128; 16]), 0.0);
    }

    #[test]
    fn rms_of_bytes() {
        assert_eq!(waveform_rms(&[128; 32]), 0.0);
        assert!((waveform_rms(&[0; 32]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn byte_zero_means_silence() {
        let mags = magnitudes_from_bytes(&[0, 255], (-100.0, -30.0));
        assert_eq!(mags[0], 0.0);
        assert!((mags[1] - 10f32.powf(-1.5)).abs() < 1e-6);
    }

    #[test]
    fn chroma_places_a440_on_a() {
        // 2048-point spectrum of 44.1 kHz audio: bin 20 sits at ~430.7 Hz, closest to A.
        let mut mags = vec![0.0f32; 1024];
        mags[20] = 1.0;
        let classes = chroma(&mags, 44_100.0 / 2048.0);
        let best = classes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(best, 9);
    }

    #[test]
    fn cepstrum_energy_concentrates_in_the_first_coefficient() {
        let mags = vec![0.1f32; 512];
        let coeffs = mel_cepstrum(&mags, 48_000.0);
        assert!(coeffs[0] < 0.0);
        for &c in &coeffs[1..] {
            assert!(c.abs() < coeffs[0].abs());
        }
    }

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0f32, 440.0, 8_000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 0.5);
        }
    }
}
