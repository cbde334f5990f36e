// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    MalformedMarkup,
    UnknownNodeShape,
    BadCallFormArgs,
    EmptyFormula,
    UnknownVariable,
    UnknownLaw,
    UnknownSymbol,
    DuplicateSymbol,
    ConflictingAssociatedLaw,
    ConflictingLawTarget,
    AmbiguousLaw,
    CircularDependency,
    MissingValue,
    BadReaction,
    UnknownSpecies,
    UnsupportedDimensions,
    UnsupportedAccumulation,
    UnsupportedOperation,
    NumericalFailure,
    Json,
    Io,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            MalformedMarkup => "malformed_markup",
            UnknownNodeShape => "unknown_node_shape",
            BadCallFormArgs => "bad_call_form_args",
            EmptyFormula => "empty_formula",
            UnknownVariable => "unknown_variable",
            UnknownLaw => "unknown_law",
            UnknownSymbol => "unknown_symbol",
            DuplicateSymbol => "duplicate_symbol",
            ConflictingAssociatedLaw => "conflicting_associated_law",
            ConflictingLawTarget => "conflicting_law_target",
            AmbiguousLaw => "ambiguous_law",
            CircularDependency => "circular_dependency",
            MissingValue => "missing_value",
            BadReaction => "bad_reaction",
            UnknownSpecies => "unknown_species",
            UnsupportedDimensions => "unsupported_dimensions",
            UnsupportedAccumulation => "unsupported_accumulation",
            UnsupportedOperation => "unsupported_operation",
            NumericalFailure => "numerical_failure",
            Json => "json",
            Io => "io",
        };

        write!(f, "{name}")
    }
}

/// ErrorKind is the coarse taxonomy callers branch on: shape errors come
/// from malformed formula markup, configuration errors from the ontology or
/// model context, numerical failures from solver output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Shape,
    Configuration,
    Numerical,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }

    pub fn is_shape_error(&self) -> bool {
        self.kind == ErrorKind::Shape
    }

    pub fn is_configuration_error(&self) -> bool {
        self.kind == ErrorKind::Configuration
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Shape => "ShapeError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Numerical => "NumericalError",
            ErrorKind::Import => "ImportError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Import,
            code: ErrorCode::Json,
            details: Some(err.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Import,
            code: ErrorCode::Io,
            details: Some(err.to_string()),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

#[test]
fn test_error_display() {
    let err = Error::new(
        ErrorKind::Configuration,
        ErrorCode::MissingValue,
        Some("Rate_Constant".to_owned()),
    );
    assert_eq!("ConfigurationError{missing_value: Rate_Constant}", err.to_string());
    assert!(err.is_configuration_error());
    assert!(!err.is_shape_error());

    let err = Error::new(ErrorKind::Shape, ErrorCode::BadCallFormArgs, None);
    assert_eq!("ShapeError{bad_call_form_args}", format!("{err}"));

    let err = Error::new(ErrorKind::Numerical, ErrorCode::NumericalFailure, None);
    assert_eq!("NumericalError{numerical_failure}", err.to_string());
}

#[test]
fn test_json_error_conversion() {
    let err: Error = serde_json::from_str::<Vec<f64>>("[1, ").unwrap_err().into();
    assert_eq!(ErrorKind::Import, err.kind);
    assert_eq!(ErrorCode::Json, err.code);
    assert!(err.get_details().is_some());
}
