//! DSP fuer die Wiedergabe synthetisierter Sprache
//!
//! Synthetisierte Turns sind nicht immer um Null zentriert. Ein DC-Versatz
//! erzeugt hoerbare Klicks an Turn-Anfang und -Ende. Ein einpoliger Hochpass
//! weit unterhalb der tiefsten Stimmgrundfrequenz entfernt ihn Sample fuer Sample.

use std::f32::consts::PI;

/// Standard-Grenzfrequenz des DC-Filters in Hz
pub const STANDARD_GRENZFREQUENZ_HZ: f32 = 10.0;

/// Gemeinsames Trait fuer Wiedergabe-Prozessoren
///
/// Verarbeitet PCM-Samples in-place. Der Zustand gehoert zum aktuellen Turn
/// und wird mit `reset` verworfen.
pub trait AudioProcessor: Send + Sync {
    fn process(&mut self, samples: &mut [i16]);

    /// Setzt den internen Zustand zurueck (Filter-Historie)
    fn reset(&mut self);

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);
}

// ---------------------------------------------------------------------------
// Hochpass
// ---------------------------------------------------------------------------

/// Einpoliger Hochpass (RC-Glied): `y[n] = a * (y[n-1] + x[n] - x[n-1])`
///
/// Das Filtergedaechtnis wird mit dem ersten Sample eines Turns geladen
/// (`x[-1] = x[0]`, `y[-1] = 0`). Ein konstanter Versatz am Turn-Anfang
/// erscheint dadurch nicht als Sprung am Ausgang.
#[derive(Debug, Clone)]
pub struct Hochpass {
    a: f32,
    x_vorher: f32,
    y_vorher: f32,
    geladen: bool,
    enabled: bool,
}

impl Hochpass {
    pub fn neu(grenzfrequenz_hz: f32, sample_rate: u32) -> Self {
        let rc = 1.0 / (2.0 * PI * grenzfrequenz_hz.max(f32::MIN_POSITIVE));
        let dt = 1.0 / sample_rate.max(1) as f32;
        Self {
            a: rc / (rc + dt),
            x_vorher: 0.0,
            y_vorher: 0.0,
            geladen: false,
            enabled: grenzfrequenz_hz > 0.0,
        }
    }

    /// Filterkoeffizient `a = RC / (RC + dt)`
    pub fn koeffizient(&self) -> f32 {
        self.a
    }
}

impl AudioProcessor for Hochpass {
    fn process(&mut self, samples: &mut [i16]) {
        if !self.enabled {
            return;
        }
        for sample in samples.iter_mut() {
            let x = f32::from(*sample);
            if !self.geladen {
                self.x_vorher = x;
                self.y_vorher = 0.0;
                self.geladen = true;
            }
            let y = self.a * (self.y_vorher + x - self.x_vorher);
            self.x_vorher = x;
            self.y_vorher = y;
            *sample = y.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        }
    }

    fn reset(&mut self) {
        self.x_vorher = 0.0;
        self.y_vorher = 0.0;
        self.geladen = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: u32 = 24_000;

    fn sinus_mit_versatz(versatz: f32, amplitude: f32, frequenz: f32, n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let t = i as f32 / FS as f32;
                (versatz + amplitude * (2.0 * PI * frequenz * t).sin()).round() as i16
            })
            .collect()
    }

    fn mittelwert(samples: &[i16]) -> f32 {
        samples.iter().map(|&s| f32::from(s)).sum::<f32>() / samples.len() as f32
    }

    #[test]
    fn koeffizient_fuer_10hz() {
        let filter = Hochpass::neu(10.0, FS);
        assert!((filter.koeffizient() - 0.99739).abs() < 1e-4);
    }

    #[test]
    fn versatz_verschwindet_in_weniger_als_50_samples() {
        let versatz = 4000.0;
        let mut samples = sinus_mit_versatz(versatz, 2000.0, 1000.0, 48);
        let mut filter = Hochpass::neu(STANDARD_GRENZFREQUENZ_HZ, FS);
        filter.process(&mut samples);

        let mittel = mittelwert(&samples).abs();
        assert!(mittel < 0.01 * versatz, "Restversatz {mittel}");
    }

    #[test]
    fn langzeit_mittelwert_ist_null() {
        let mut samples = sinus_mit_versatz(-3000.0, 1500.0, 200.0, FS as usize);
        let mut filter = Hochpass::neu(STANDARD_GRENZFREQUENZ_HZ, FS);
        for block in samples.chunks_mut(480) {
            filter.process(block);
        }
        let rest = mittelwert(&samples[FS as usize / 2..]).abs();
        assert!(rest < 5.0, "Restversatz {rest}");
    }

    #[test]
    fn konstanter_turn_beginnt_ohne_sprung() {
        let mut samples = vec![8000i16; 480];
        let mut filter = Hochpass::neu(STANDARD_GRENZFREQUENZ_HZ, FS);
        filter.process(&mut samples);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn reset_laedt_gedaechtnis_neu() {
        let mut filter = Hochpass::neu(STANDARD_GRENZFREQUENZ_HZ, FS);
        let mut erster = vec![1000i16; 100];
        filter.process(&mut erster);

        filter.reset();
        let mut zweiter = vec![-5000i16; 100];
        filter.process(&mut zweiter);
        // Ohne Reset waere der Sprung von 1000 auf -5000 am Ausgang sichtbar
        assert_eq!(zweiter[0], 0);
    }

    #[test]
    fn deaktiviert_laesst_samples_unveraendert() {
        let mut filter = Hochpass::neu(STANDARD_GRENZFREQUENZ_HZ, FS);
        filter.set_enabled(false);
        let mut samples = vec![1234i16; 10];
        filter.process(&mut samples);
        assert!(samples.iter().all(|&s| s == 1234));

        assert!(!Hochpass::neu(0.0, FS).is_enabled());
    }
}
