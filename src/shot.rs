//! Shot files: the steps, variables, lanes and devices of one shot, as YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compiler::{CompilationError, Devices, Lanes, ShotCompiler, ShotParameters};
use crate::expression::{DottedVariableName, EvaluationError, Expression, VariableNamespace};
use crate::lane::Step;

#[derive(Debug, Error)]
pub enum ShotFileError {
    #[error("could not read shot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid shot file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("could not evaluate variable '{name}'")]
    Variable {
        name: DottedVariableName,
        #[source]
        source: EvaluationError,
    },

    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

/// A variable defined by an expression that may use the variables defined before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: DottedVariableName,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotFile {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    #[serde(default)]
    pub lanes: Lanes,
    pub devices: Devices,
}

impl ShotFile {
    pub fn load(path: &Path) -> Result<Self, ShotFileError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ShotFileError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String, ShotFileError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Evaluate the variable definitions in order.
    pub fn namespace(&self) -> Result<VariableNamespace, ShotFileError> {
        let mut namespace = VariableNamespace::new();
        for definition in &self.variables {
            let value = definition
                .value
                .evaluate(&namespace)
                .map_err(|source| ShotFileError::Variable {
                    name: definition.name.clone(),
                    source,
                })?;
            namespace.insert(definition.name.clone(), value);
        }
        Ok(namespace)
    }

    /// Compile the parameters of every device.
    pub fn compile(&self) -> Result<ShotParameters, ShotFileError> {
        let namespace = self.namespace()?;
        let compiler = ShotCompiler::new(&self.steps, &self.lanes, &self.devices)?;
        Ok(compiler.compile(&namespace)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Quantity, Unit, Value};
    use crate::lane::TimeLane;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SHOT: &str = r#"
steps:
  - {name: load, duration: "10 us"}
  - {name: image, duration: "wait"}
variables:
  - {name: wait, value: "5 us"}
  - {name: mot.detuning, value: "2 * wait"}
lanes:
  shutter:
    type: digital
    blocks:
      - {value: false, span: 1}
      - {value: true, span: 1}
  camera:
    type: camera
    blocks:
      - {value: null, span: 1}
      - {value: {picture_name: atoms}, span: 1}
devices:
  seq:
    type: sequencer
    time_step: 1000
    trigger: {trigger_type: software}
    channels:
      - type: digital
        description: shutter
        output: {type: lane_values, lane: shutter}
      - type: digital
        description: camera
        output: {type: device_trigger, device_name: camera}
  camera:
    type: camera
"#;

    #[test]
    fn variables_are_evaluated_in_order() {
        let shot = ShotFile::from_yaml(SHOT).unwrap();
        let namespace = shot.namespace().unwrap();
        assert_eq!(
            namespace.get("wait"),
            Some(&Value::Quantity(Quantity::new(5.0, Unit::Microsecond)))
        );
        assert!(namespace.contains("mot.detuning"));
    }

    #[test]
    fn undefined_variable_is_reported() {
        let mut shot = ShotFile::from_yaml(SHOT).unwrap();
        shot.variables.swap(0, 1);
        match shot.namespace() {
            Err(ShotFileError::Variable { name, .. }) => assert_eq!(name.as_str(), "mot.detuning"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SHOT.as_bytes()).unwrap();
        let shot = ShotFile::load(file.path()).unwrap();
        assert_eq!(shot.steps.len(), 2);
        assert!(matches!(shot.lanes["camera"], TimeLane::Camera(_)));
        assert_eq!(ShotFile::from_yaml(&shot.to_yaml().unwrap()).unwrap(), shot);
    }

    #[test]
    fn missing_file() {
        let result = ShotFile::load(Path::new("/nonexistent/shot.yaml"));
        assert!(matches!(result, Err(ShotFileError::Io(_))));
    }

    #[test]
    fn invalid_yaml() {
        assert!(matches!(
            ShotFile::from_yaml("steps: 3"),
            Err(ShotFileError::Yaml(_))
        ));
    }

    #[test]
    fn compile_shot() {
        let parameters = ShotFile::from_yaml(SHOT).unwrap().compile().unwrap();
        assert_eq!(parameters.sequencers["seq"].sequence.len(), 15);
        assert_eq!(parameters.cameras["camera"].picture_names, vec!["atoms"]);
        assert_eq!(parameters.cameras["camera"].exposures.len(), 1);
    }
}
