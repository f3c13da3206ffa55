//! Process program deployment
//!
//! A process program is an ordered sequence of steps; each step invokes one
//! function from a catalog of signatures with named arguments. Deployment
//! packs every step into a fixed-width word slot (function code first, then
//! each declared argument encoded per type) and writes the concatenated
//! buffer to the controller's data registers in one shot.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::device::DeviceCode;
use crate::core::traits::Communication;
use crate::core::values::{encode_value, PlcValue, TagType};
use crate::utils::error::{McSrvError, Result};

/// Default word address of the first step slot
pub const DEFAULT_BASE_ADDRESS: u32 = 1000;
/// Default fixed width of one step slot, in words
pub const DEFAULT_STEP_WORDS: u16 = 10;

/// One declared argument of a function signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionArg {
    pub position: u16,
    pub name: String,
    pub arg_type: TagType,
    #[serde(default)]
    pub required: bool,
}

impl FunctionArg {
    /// Word footprint inside a step slot; strings occupy a single word
    fn word_length(&self) -> u16 {
        match self.arg_type {
            TagType::String => 1,
            other => other.default_word_length(),
        }
    }
}

/// A callable function signature from the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessFunction {
    pub id: i64,
    pub code: u16,
    pub name: String,
    #[serde(default)]
    pub args: Vec<FunctionArg>,
}

/// One invocation inside a program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStep {
    pub sequence: u32,
    pub function_id: i64,
    #[serde(default)]
    pub args: HashMap<String, PlcValue>,
}

/// An ordered sequence of steps with optional deployment overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessProgram {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub base_address: Option<u32>,
    #[serde(default)]
    pub step_words: Option<u16>,
    #[serde(default)]
    pub steps: Vec<ProcessStep>,
}

/// Per-deployment overrides, taking precedence over the program's own
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    pub base_address: Option<u32>,
    pub step_words: Option<u16>,
}

/// Outcome of a deployment: the packed words and where they went
#[derive(Debug, Clone, Serialize)]
pub struct DeployResult {
    pub words: Vec<u16>,
    pub base_address: u32,
    pub step_words: u16,
}

/// Packs step sequences against a function catalog and writes them out
pub struct ProcessRuntime {
    client: Arc<dyn Communication>,
    functions: HashMap<i64, ProcessFunction>,
}

impl ProcessRuntime {
    pub fn new(client: Arc<dyn Communication>, catalog: Vec<ProcessFunction>) -> Self {
        let functions = catalog.into_iter().map(|f| (f.id, f)).collect();
        Self { client, functions }
    }

    /// Pack every step of `program` and write the buffer to the controller
    pub async fn deploy_program(
        &self,
        program: &ProcessProgram,
        options: DeployOptions,
    ) -> Result<DeployResult> {
        if program.steps.is_empty() {
            return Err(McSrvError::InvalidData("Program has no steps".to_string()));
        }
        let step_words = options
            .step_words
            .or(program.step_words)
            .unwrap_or(DEFAULT_STEP_WORDS);
        let base_address = options
            .base_address
            .or(program.base_address)
            .unwrap_or(DEFAULT_BASE_ADDRESS);

        let mut steps: Vec<&ProcessStep> = program.steps.iter().collect();
        steps.sort_by_key(|s| s.sequence);

        let mut words = Vec::with_capacity(steps.len() * step_words as usize);
        for step in steps {
            let function = self.functions.get(&step.function_id).ok_or_else(|| {
                McSrvError::NotFound(format!(
                    "Function {} for step {} of program '{}'",
                    step.function_id, step.sequence, program.name
                ))
            })?;
            words.extend(pack_step(function, &step.args, step_words)?);
        }

        self.client
            .write_numbers(DeviceCode::D, base_address, &words)
            .await?;
        info!(
            "Deployed program '{}': {} steps, {} words at D{}",
            program.name,
            program.steps.len(),
            words.len(),
            base_address
        );

        Ok(DeployResult {
            words,
            base_address,
            step_words,
        })
    }
}

/// Pack one function invocation into exactly `step_words` words.
///
/// All validation happens here, before any wire access: missing required
/// arguments, value/type mismatches, and slot overflow are errors.
pub fn pack_step(
    function: &ProcessFunction,
    provided: &HashMap<String, PlcValue>,
    step_words: u16,
) -> Result<Vec<u16>> {
    let mut out = vec![function.code];

    let mut args: Vec<&FunctionArg> = function.args.iter().collect();
    args.sort_by_key(|a| a.position);

    for arg in args {
        match provided.get(&arg.name) {
            Some(value) => {
                let words =
                    encode_value(arg.arg_type, value, arg.word_length(), None).map_err(|e| {
                        McSrvError::InvalidParameter(format!(
                            "Argument '{}' of function {}: {}",
                            arg.name, function.code, e
                        ))
                    })?;
                out.extend(words);
            }
            None if arg.required => {
                return Err(McSrvError::InvalidParameter(format!(
                    "Missing required argument '{}' for function {}",
                    arg.name, function.code
                )));
            }
            None => {
                // zero encoding of the argument's type
                out.extend(std::iter::repeat(0).take(arg.word_length() as usize));
            }
        }
    }

    if out.len() > step_words as usize {
        return Err(McSrvError::InvalidData(format!(
            "Step for function {} exceeds step width ({} > {} words)",
            function.code,
            out.len(),
            step_words
        )));
    }
    out.resize(step_words as usize, 0);
    Ok(out)
}
