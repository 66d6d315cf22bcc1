// Archivo: backoff.rs
// Propósito: espera exponencial entre intentos de subida dentro de un ciclo.
use std::time::Duration;

/// Exponente máximo aplicado a la base.
const MAX_SHIFT: u32 = 16;

/// Espera antes del intento `attempt + 1`, con `attempt` contado desde 1:
/// `base`, `2 * base`, `4 * base`, ...
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_SHIFT);
    base.saturating_mul(1u32 << shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        // attempt 0 se trata como el primero
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(2));
    }

    #[test]
    fn shift_is_capped() {
        let base = Duration::from_millis(1);
        assert_eq!(backoff_delay(base, 100), Duration::from_millis(1 << MAX_SHIFT));
    }
}
