//! Reference-vs-accelerator comparison for one case.

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::case::{ConvCase, ElementWidth};
use crate::cfu::{CfuEmulator, CfuStats};
use crate::conv::{conv_accelerated, conv_reference, Backend, QuantElement};
use crate::error::ConvError;

#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    pub index: usize,
    pub reference: i32,
    pub accelerated: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub width: ElementWidth,
    pub output_shape: [usize; 4],
    /// Wrapping sum of the reference output, handy for spotting regressions across runs.
    pub checksum: i64,
    /// None when the accelerator was not exercised.
    pub accelerator: Option<CfuStats>,
    pub mismatches: usize,
    pub first_mismatch: Option<Mismatch>,
}

impl CaseReport {
    pub fn passed(&self) -> bool { self.mismatches == 0 }
}

fn checksum<E: QuantElement>(out: &[E]) -> i64 {
    out.iter().fold(0i64, |acc, v| acc.wrapping_mul(31).wrapping_add(v.to_i32() as i64))
}

/// Run `case` through the software reference and, for int8, through a fresh emulated accelerator.
pub fn run_case(case: &ConvCase) -> Result<CaseReport> {
    let report = match case.width {
        ElementWidth::Int8 => run_int8(case)?,
        ElementWidth::Int16 => run_int16(case)?,
    };
    info!(
        "{}: {:?} -> {} mismatches (checksum {:#x})",
        report.name, report.output_shape, report.mismatches, report.checksum
    );
    Ok(report)
}

fn run_int8(case: &ConvCase) -> Result<CaseReport> {
    let data = case.materialize::<i8>()?;
    let problem = data.problem();
    let mut reference = data.output_buffer();
    conv_reference(&problem, &mut reference).with_context(|| format!("case {}: reference", case.name))?;

    let mut emulator = CfuEmulator::new();
    let mut accelerated = data.output_buffer();
    conv_accelerated(&mut emulator, &problem, &mut accelerated).with_context(|| format!("case {}: accelerator", case.name))?;

    let diffs: Vec<usize> = reference.iter().zip(&accelerated).enumerate().filter(|(_, (r, a))| r != a).map(|(i, _)| i).collect();
    let first_mismatch = diffs.first().map(|&index| Mismatch {
        index,
        reference: reference[index] as i32,
        accelerated: accelerated[index] as i32,
    });
    Ok(CaseReport {
        name: case.name.clone(),
        width: case.width,
        output_shape: data.output_shape.dims,
        checksum: checksum(&reference),
        accelerator: Some(emulator.stats()),
        mismatches: diffs.len(),
        first_mismatch,
    })
}

fn run_int16(case: &ConvCase) -> Result<CaseReport> {
    let data = case.materialize::<i16>()?;
    let problem = data.problem();
    let mut out = data.output_buffer();
    Backend::Reference.run_i16(&problem, &mut out).with_context(|| format!("case {}: reference", case.name))?;

    // The accelerator reduces int8 only; confirm it refuses instead of computing garbage.
    let mut emulator = CfuEmulator::new();
    let mut scratch = data.output_buffer();
    match Backend::Accelerator(&mut emulator).run_i16(&problem, &mut scratch) {
        Err(ConvError::AcceleratorUnsupported(_)) => {}
        other => anyhow::bail!("case {}: int16 accelerator returned {:?}", case.name, other),
    }

    Ok(CaseReport {
        name: case.name.clone(),
        width: case.width,
        output_shape: data.output_shape.dims,
        checksum: checksum(&out),
        accelerator: None,
        mismatches: 0,
        first_mismatch: None,
    })
}
