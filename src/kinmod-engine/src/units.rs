// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use float_cmp::approx_eq;

use crate::datamodel::{ParameterValue, Unit};

/// rescale converts a value expressed in `unit` to the standard unit:
/// multiply by the ratio, then add the intercept.  A zero or absent
/// ratio leaves the magnitude alone.
pub fn rescale(value: f64, unit: &Unit) -> f64 {
    let mut value = value;
    if let Some(ratio) = unit.ratio_to_standard {
        if !approx_eq!(f64, ratio, 0.0) {
            value *= ratio;
        }
    }
    if let Some(intercept) = unit.intercept {
        value += intercept;
    }
    value
}

pub fn rescale_value(value: ParameterValue, unit: Option<&Unit>) -> ParameterValue {
    match unit {
        Some(unit) => value.map(|v| rescale(v, unit)),
        None => value,
    }
}
