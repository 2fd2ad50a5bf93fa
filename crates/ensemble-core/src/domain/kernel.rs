//! Kernel templates: per-application command descriptions that resolve to a
//! concrete executable for a given target resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::{ConfigError, EngineError, ValidationError};
use super::task::{CpuRequirements, ExecutionDescriptor};

/// Resource key used when no exact profile exists.
pub const WILDCARD_RESOURCE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelArgument {
    pub mandatory: bool,
    #[serde(default)]
    pub description: String,
}

/// How a kernel runs on one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub executable: String,
    pub environment: BTreeMap<String, String>,
    pub pre_exec: Vec<String>,
    pub post_exec: Vec<String>,
    pub uses_mpi: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declared arguments keyed by their flag prefix, e.g. `"--file="`.
    #[serde(default)]
    pub arguments: BTreeMap<String, KernelArgument>,
    /// Argument list with `{flag}` placeholders. When absent the caller's
    /// arguments are passed through verbatim.
    #[serde(default)]
    pub argument_template: Option<Vec<String>>,
    pub machine_configs: BTreeMap<String, MachineConfig>,
}

/// Look up the profile for `resource`, falling back to the wildcard.
pub fn resolve_machine_config<'a>(
    kernel: &str,
    machine_configs: &'a BTreeMap<String, MachineConfig>,
    resource: &str,
) -> Result<&'a MachineConfig, ConfigError> {
    machine_configs
        .get(resource)
        .or_else(|| machine_configs.get(WILDCARD_RESOURCE))
        .ok_or_else(|| ConfigError::NoKernelConfiguration {
            kernel: kernel.to_string(),
            resource: resource.to_string(),
        })
}

/// A kernel resolved against one resource with concrete arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundKernel {
    pub name: String,
    pub executable: String,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub pre_exec: Vec<String>,
    pub post_exec: Vec<String>,
    pub uses_mpi: bool,
}

impl KernelTemplate {
    /// Split `--flag=value` arguments against the declared flags.
    fn parse_arguments(&self, args: &[String]) -> Result<BTreeMap<String, String>, ValidationError> {
        let mut values = BTreeMap::new();
        for arg in args {
            let flag = self
                .arguments
                .keys()
                .find(|flag| arg.starts_with(flag.as_str()))
                .ok_or_else(|| ValidationError::UnknownArgument {
                    kernel: self.name.clone(),
                    argument: arg.clone(),
                })?;
            values.insert(flag.clone(), arg[flag.len()..].to_string());
        }

        if let Some((flag, _)) = self
            .arguments
            .iter()
            .find(|(flag, spec)| spec.mandatory && !values.contains_key(*flag))
        {
            return Err(ValidationError::MissingArgument {
                kernel: self.name.clone(),
                argument: flag.clone(),
            });
        }
        Ok(values)
    }

    pub fn bind(&self, resource: &str, args: &[String]) -> Result<BoundKernel, EngineError> {
        let values = self.parse_arguments(args)?;
        let cfg = resolve_machine_config(&self.name, &self.machine_configs, resource)?;

        let arguments = match &self.argument_template {
            Some(template) => template
                .iter()
                .map(|part| {
                    values.iter().fold(part.clone(), |acc, (flag, value)| {
                        acc.replace(&format!("{{{flag}}}"), value)
                    })
                })
                .collect(),
            None => args.to_vec(),
        };

        Ok(BoundKernel {
            name: self.name.clone(),
            executable: cfg.executable.clone(),
            arguments,
            environment: cfg.environment.clone(),
            pre_exec: cfg.pre_exec.clone(),
            post_exec: cfg.post_exec.clone(),
            uses_mpi: cfg.uses_mpi,
        })
    }
}

impl BoundKernel {
    pub fn into_execution(self, cores: u32) -> ExecutionDescriptor {
        ExecutionDescriptor {
            executable: self.executable,
            arguments: self.arguments,
            environment: self.environment,
            pre_exec: self.pre_exec,
            post_exec: self.post_exec,
            cpu_reqs: CpuRequirements {
                processes: cores.max(1),
                threads_per_process: 1,
                uses_mpi: self.uses_mpi,
            },
            ..Default::default()
        }
    }
}

/// `misc.hello`: appends "Hello World" to the file given by `--file=`.
pub fn hello_kernel() -> KernelTemplate {
    let mut arguments = BTreeMap::new();
    arguments.insert(
        "--file=".to_string(),
        KernelArgument {
            mandatory: true,
            description: "The input file.".to_string(),
        },
    );

    let mut machine_configs = BTreeMap::new();
    machine_configs.insert(
        WILDCARD_RESOURCE.to_string(),
        MachineConfig {
            executable: "/bin/bash".to_string(),
            ..Default::default()
        },
    );

    KernelTemplate {
        name: "misc.hello".to_string(),
        description: "Writes Hello World to a file".to_string(),
        arguments,
        argument_template: Some(vec![
            "-l".to_string(),
            "-c".to_string(),
            "/bin/echo 'Hello World' >> {--file=}".to_string(),
        ]),
        machine_configs,
    }
}
