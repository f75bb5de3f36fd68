//! Derivación del modo de reloj.
//!
//! El PLL del P2 produce `xin / divd * mult / post`. La palabra de modo
//! empaqueta los tres factores junto con la selección de fuente:
//!
//! ```text
//! 0000_000E_DDDD_DDMM_MMMM_MMMM_PPPP_CCSS
//! ```
//!
//! La búsqueda recorre todas las combinaciones de divisor previo y
//! posdivisor, igual que la herramienta de referencia, de modo que el
//! resultado sea idéntico bit a bit.

use thiserror::Error;

/// Frecuencia de `RCFAST`.
pub const RCFAST_FREQUENCY: u32 = 20_000_000;

/// Frecuencia de `RCSLOW`.
pub const RCSLOW_FREQUENCY: u32 = 20_000;

/// Tolerancia de error por omisión (`_ERRFREQ`).
pub const DEFAULT_ERROR: u32 = 1_000_000;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    #[error("Unable to derive {target} Hz from {input} Hz within {tolerance} Hz")]
    Unreachable {
        input: u32,
        target: u32,
        tolerance: u32,
    },

    #[error("Clock symbols `{0}` and `{1}` are mutually exclusive")]
    Conflict(&'static str, &'static str),

    #[error("Clock symbol `{0}` has out of range value {1}")]
    Range(String, i64),
}

/// Fuente del reloj.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// Oscilador interno rápido, sin PLL.
    RcFast,

    /// Oscilador interno lento, sin PLL.
    RcSlow,

    /// Cristal en `XI`/`XO`, con capacitores de carga.
    Crystal(u32),

    /// Reloj externo en `XI`.
    External(u32),
}

/// Solicitud de reloj, tal como se obtiene de los símbolos `_CLKFREQ`,
/// `_XTLFREQ`, `_XINFREQ`, `_RCFAST`, `_RCSLOW` y `_ERRFREQ`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClockRequest {
    pub source: Source,
    pub frequency: Option<u32>,
    pub tolerance: u32,
}

impl Default for ClockRequest {
    fn default() -> Self {
        ClockRequest {
            source: Source::RcFast,
            frequency: None,
            tolerance: DEFAULT_ERROR,
        }
    }
}

/// Resultado de la derivación, publicado como `CLKMODE_` y `CLKFREQ_`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClockSetting {
    pub mode: u32,
    pub frequency: u32,
}

impl ClockSetting {
    /// Frecuencia de salida que produce realmente la palabra de modo.
    ///
    /// Retorna `None` si el PLL no está habilitado.
    pub fn output(&self, input: u32) -> Option<f64> {
        if self.mode & (1 << 24) == 0 {
            return None;
        }

        let divd = ((self.mode >> 18) & 0x3F) + 1;
        let mult = ((self.mode >> 8) & 0x3FF) + 1;
        let post = match (self.mode >> 4) & 0xF {
            15 => 1,
            pppp => (pppp + 1) * 2,
        };

        Some(input as f64 / divd as f64 * mult as f64 / post as f64)
    }
}

/// Deriva la palabra de modo para una solicitud.
pub fn derive(request: &ClockRequest) -> Result<ClockSetting, ClockError> {
    let (input, select) = match request.source {
        Source::RcFast => {
            return Ok(ClockSetting {
                mode: 0b00,
                frequency: RCFAST_FREQUENCY,
            })
        }

        Source::RcSlow => {
            return Ok(ClockSetting {
                mode: 0b01,
                frequency: RCSLOW_FREQUENCY,
            })
        }

        Source::Crystal(input) => (input, 0b10),
        Source::External(input) => (input, 0b01),
    };

    let target = request.frequency.unwrap_or(input);
    pll_mode(input, target, request.tolerance, select)
}

/// Búsqueda exhaustiva de los factores del PLL.
///
/// Se recorre `pppp` de 0 a 15 y `divd` de 64 a 1; ante errores iguales
/// gana la última combinación encontrada.
pub fn pll_mode(input: u32, target: u32, tolerance: u32, select: u32) -> Result<ClockSetting, ClockError> {
    let xin = input as f64;
    let clk = target as f64;
    let errfreq = tolerance as f64;

    let mut best: Option<(u32, u32, u32, f64)> = None;
    let mut error = f64::MAX;

    for pppp in 0..=15u32 {
        let post = if pppp == 0 { 1 } else { pppp * 2 };

        for divd in (1..=64u32).rev() {
            let fpfd = (xin / divd as f64).round();
            let mult = (clk * post as f64 / fpfd).round();
            let fvco = (fpfd * mult).round();
            let fout = (fvco / post as f64).round();
            let e = (fout - clk).abs();

            let valid = e <= error
                && fpfd >= 250_000.0
                && mult <= 1024.0
                && fvco > 99e6
                && (fvco <= 201e6 || fvco <= clk + errfreq);

            if valid {
                error = e;
                best = Some((pppp, divd, mult as u32, fout));
            }
        }
    }

    let unreachable = ClockError::Unreachable {
        input,
        target,
        tolerance,
    };

    let (pppp, divd, mult, fout) = match best {
        Some(best) if error <= errfreq => best,
        _ => return Err(unreachable),
    };

    log::debug!(
        "PLL for {} Hz from {} Hz: divd={}, mult={}, pppp={}, error={} Hz",
        target,
        input,
        divd,
        mult,
        pppp,
        error
    );

    let mode = 1 << 24
        | (divd - 1) << 18
        | (mult - 1) << 8
        | (pppp.wrapping_sub(1) & 0xF) << 4
        | select << 2
        | 0b11;

    Ok(ClockSetting {
        mode,
        frequency: fout as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_20mhz_to_160mhz() {
        let request = ClockRequest {
            source: Source::External(20_000_000),
            frequency: Some(160_000_000),
            tolerance: DEFAULT_ERROR,
        };

        let setting = derive(&request).unwrap();
        assert_eq!(setting.frequency, 160_000_000);
        assert_eq!((setting.mode >> 2) & 0b11, 0b01);

        let output = setting.output(20_000_000).unwrap();
        assert!((output - 160e6).abs() <= DEFAULT_ERROR as f64);
    }

    #[test]
    fn crystal_selects_xtl_mode() {
        let request = ClockRequest {
            source: Source::Crystal(20_000_000),
            frequency: Some(180_000_000),
            tolerance: DEFAULT_ERROR,
        };

        let setting = derive(&request).unwrap();
        assert_eq!((setting.mode >> 2) & 0b11, 0b10);
        assert_eq!(setting.mode & 0b11, 0b11);
        assert!(setting.mode & (1 << 24) != 0);
    }

    #[test]
    fn internal_oscillators() {
        let fast = derive(&ClockRequest::default()).unwrap();
        assert_eq!(fast, ClockSetting { mode: 0, frequency: RCFAST_FREQUENCY });

        let slow = ClockRequest {
            source: Source::RcSlow,
            ..Default::default()
        };

        assert_eq!(derive(&slow).unwrap().mode, 1);
    }

    #[test]
    fn unreachable_frequency_fails() {
        let request = ClockRequest {
            source: Source::External(20_000_000),
            frequency: Some(1_000_000),
            tolerance: 1,
        };

        assert!(matches!(derive(&request), Err(ClockError::Unreachable { .. })));
    }
}
