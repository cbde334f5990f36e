// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

pub mod common;
pub mod formula;

pub mod assembler;
mod codegen;
pub mod dimensions;
pub mod laws;
pub mod params;
pub mod reaction;
pub mod units;

pub use kinmod_core::datamodel;

pub use self::assembler::{AssemblerOptions, SimulationProgram, assemble, assemble_batch};
pub use self::common::{Error, ErrorCode, ErrorKind, Result};
pub use self::formula::{CompiledExpression, compile};
pub use self::params::ParameterTable;
