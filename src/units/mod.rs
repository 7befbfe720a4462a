//! Unit registry: conversion between named physical units and the internal
//! unit system.
//!
//! # Internal basis
//! | quantity | internal unit |
//! |----------|---------------|
//! | length   | mm            |
//! | time     | ns            |
//! | energy   | MeV           |
//! | charge   | e             |
//! | temperature | K          |
//! | angle    | rad           |
//!
//! Derived units follow from the basis, e.g. `V = 1e-6` (MeV / e) and
//! `T = 1e-3` (V·ns / mm²).
//!
//! # Expressions
//! A unit string is a product or quotient of registered names separated by
//! `*` and `/`, such as `V/cm`, `kV*cm` or `/um`.  The empty string converts
//! nothing.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::error::{FieldError, Result};

/// Elementary charge in coulomb.
const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;

/// Conversion between named units and internal units.
///
/// Implementations must be usable from several threads at once; the cache
/// shares one converter across all of its decodes.
pub trait UnitConverter: Send + Sync {
    /// Value of one `unit` expressed in internal units.
    fn factor(&self, unit: &str) -> Result<f64>;

    /// Convert `value` expressed in `unit` into internal units.
    fn to_internal(&self, value: f64, unit: &str) -> Result<f64> {
        Ok(value * self.factor(unit)?)
    }

    /// Convert an internal `value` into `unit`.
    fn from_internal(&self, value: f64, unit: &str) -> Result<f64> {
        Ok(value / self.factor(unit)?)
    }
}

#[derive(Debug, Clone)]
pub struct Units {
    factors: HashMap<String, f64>,
}

impl Default for Units {
    fn default() -> Self {
        Self::new()
    }
}

impl Units {
    /// Registry pre-populated with the built-in unit names.
    pub fn new() -> Self {
        let mut u = Self::empty();

        // Length
        u.add("nm", 1e-6);
        u.add("um", 1e-3);
        u.add("mm", 1.0);
        u.add("cm", 10.0);
        u.add("m",  1e3);

        // Time
        u.add("ps", 1e-3);
        u.add("ns", 1.0);
        u.add("us", 1e3);
        u.add("ms", 1e6);
        u.add("s",  1e9);

        // Energy
        u.add("eV",  1e-6);
        u.add("keV", 1e-3);
        u.add("MeV", 1.0);
        u.add("GeV", 1e3);

        // Temperature
        u.add("K", 1.0);

        // Charge
        u.add("e",  1.0);
        u.add("ke", 1e3);
        u.add("fC", 1e-15 / ELEMENTARY_CHARGE);
        u.add("C",  1.0 / ELEMENTARY_CHARGE);

        // Voltage
        u.add("mV", 1e-9);
        u.add("V",  1e-6);
        u.add("kV", 1e-3);

        // Magnetic field
        u.add("mT", 1e-6);
        u.add("T",  1e-3);

        // Angle
        u.add("rad",  1.0);
        u.add("mrad", 1e-3);
        u.add("deg",  PI / 180.0);

        u
    }

    /// Registry without any names.
    pub fn empty() -> Self {
        Self { factors: HashMap::new() }
    }

    /// Register (or replace) a unit by its value in internal units.
    pub fn add(&mut self, name: &str, factor: f64) {
        self.factors.insert(name.to_string(), factor);
    }

    /// Parse a JSON object of `name → factor` and register every entry.
    pub fn extend_from_json(&mut self, json: &str) -> std::result::Result<(), serde_json::Error> {
        let extra: HashMap<String, f64> = serde_json::from_str(json)?;
        self.factors.extend(extra);
        Ok(())
    }

    fn resolve(&self, expr: &str) -> Result<f64> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(1.0);
        }

        let mut factor = 1.0;
        let mut op = '*';
        let mut name = String::new();
        let mut leading = true;
        // '\0' terminates the last name
        let chars = expr.chars().filter(|c| !c.is_whitespace()).chain(std::iter::once('\0'));
        for ch in chars {
            if ch != '*' && ch != '/' && ch != '\0' {
                name.push(ch);
                leading = false;
                continue;
            }
            if name.is_empty() {
                // only a leading '/' may appear without a name before it
                if !(leading && ch == '/') {
                    return Err(FieldError::UnknownUnit(expr.to_string()));
                }
            } else {
                let f = self.single(&name, expr)?;
                if op == '/' { factor /= f } else { factor *= f }
                name.clear();
            }
            op = ch;
            leading = false;
        }
        Ok(factor)
    }

    fn single(&self, name: &str, expr: &str) -> Result<f64> {
        self.factors
            .get(name)
            .copied()
            .ok_or_else(|| FieldError::UnknownUnit(expr.to_string()))
    }
}

impl UnitConverter for Units {
    fn factor(&self, unit: &str) -> Result<f64> {
        self.resolve(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_simple_units() {
        let u = Units::new();
        assert!(close(u.to_internal(100.0, "um").unwrap(), 0.1));
        assert!(close(u.from_internal(0.1, "um").unwrap(), 100.0));
        assert!(close(u.to_internal(2.0, "cm").unwrap(), 20.0));
    }

    #[test]
    fn test_compound_units() {
        let u = Units::new();
        // 1 V/cm = 1e-6 / 10 internal
        assert!(close(u.factor("V/cm").unwrap(), 1e-7));
        assert!(close(u.factor("kV/cm").unwrap(), 1e-4));
        assert!(close(u.factor("/um").unwrap(), 1e3));
        assert!(close(u.factor("V * cm").unwrap(), 1e-5));
    }

    #[test]
    fn test_empty_unit_is_identity() {
        let u = Units::new();
        assert_eq!(u.to_internal(4.5, "").unwrap(), 4.5);
        assert_eq!(u.from_internal(4.5, "  ").unwrap(), 4.5);
    }

    #[test]
    fn test_unknown_unit() {
        let u = Units::new();
        assert!(matches!(u.factor("V/furlong"), Err(FieldError::UnknownUnit(_))));
        assert!(matches!(u.factor("V//cm"), Err(FieldError::UnknownUnit(_))));
        assert!(matches!(u.factor("V/"), Err(FieldError::UnknownUnit(_))));
    }

    #[test]
    fn test_extend_from_json() {
        let mut u = Units::empty();
        u.extend_from_json(r#"{"mil": 0.0254}"#).unwrap();
        assert!(close(u.to_internal(10.0, "mil").unwrap(), 0.254));
        assert!(u.extend_from_json("[1, 2]").is_err());
    }
}
