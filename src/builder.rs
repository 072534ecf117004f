//! Draft run configuration accumulated across the wizard steps.
//!
//! Each setter validates its own step. Code generation is plain text templating:
//! nothing here parses or checks the generated Python or YAML.

use crate::error::ConfigError;
use crate::model::{
    BasicInfo, GeneratedCode, RunMisc, RunModule, RunRecord, RunTemplates, RunType, Selection,
    SubmissionPayload, TrainingInput, TrainingParams,
};

/// Words a run name may not be, since the name ends up in generated Python.
pub const RESERVED_NAMES: [&str; 11] = [
    "import", "from", "as", "class", "def", "return", "pass", "if", "else", "for", "while",
];

const MISC_SEED: u64 = 42;

/// Check a run name against the submit-time safety rule.
pub fn validate_run_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason| {
        Err(ConfigError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return invalid("is empty");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid("may only contain letters, digits and underscores");
    }
    if RESERVED_NAMES.contains(&name) {
        return invalid("is a reserved word");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    basic: BasicInfo,
    training: TrainingParams,
    selection: Selection,
    generated: Option<GeneratedCode>,
    modules: Vec<RunModule>,
    module_counter: u32,
    available_gpus: u32,
}

impl RunConfigBuilder {
    pub fn new(available_gpus: u32) -> Self {
        Self {
            basic: BasicInfo::default(),
            training: TrainingParams::default(),
            selection: Selection::default(),
            generated: None,
            modules: Vec::new(),
            module_counter: 0,
            available_gpus,
        }
    }

    /// Seed a builder from an existing run so it can be edited.
    pub fn from_record(record: &RunRecord, available_gpus: u32, code: GeneratedCode) -> Self {
        let mut b = Self::new(available_gpus);
        b.basic.name = record.id.clone();
        b.basic.description = record.description.clone();
        b.training = record.training.unwrap_or_default();
        if let Some(t) = record.run_type.as_deref() {
            b.basic.run_type = RunType::ALL
                .into_iter()
                .find(|rt| rt.as_str().eq_ignore_ascii_case(t))
                .unwrap_or_default();
        }
        b.selection = Selection {
            model_id: record.model.clone(),
            dataset_id: record.dataset.clone(),
            optimization_id: record.optimization.clone(),
            num_gpus: record.num_gpus.max(1),
        };
        b.generated = Some(code);
        b
    }

    pub fn basic(&self) -> &BasicInfo {
        &self.basic
    }

    pub fn training(&self) -> &TrainingParams {
        &self.training
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn modules(&self) -> &[RunModule] {
        &self.modules
    }

    pub fn module_count(&self) -> u32 {
        self.module_counter
    }

    pub fn available_gpus(&self) -> u32 {
        self.available_gpus
    }

    pub fn generated(&self) -> Option<&GeneratedCode> {
        self.generated.as_ref()
    }

    pub fn set_basic(
        &mut self,
        name: &str,
        run_type: RunType,
        description: &str,
    ) -> Result<(), ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::validation("name", "Run name is required"));
        }
        self.basic = BasicInfo {
            name: name.to_string(),
            run_type,
            description: description.trim().to_string(),
        };
        Ok(())
    }

    /// Validate and store training fields. Only train/finetune runs check them;
    /// for other types the input is ignored and the current values are kept.
    pub fn set_training(&mut self, input: &TrainingInput) -> Result<(), ConfigError> {
        if !self.basic.run_type.requires_training() {
            return Ok(());
        }
        let batch_size = positive_u32("batch_size", input.batch_size)?;
        let epochs = positive_u32("epochs", input.epochs)?;
        if !(input.learning_rate.is_finite() && input.learning_rate > 0.0) {
            return Err(ConfigError::validation(
                "learning_rate",
                "must be greater than zero",
            ));
        }
        if !(input.weight_decay.is_finite() && input.weight_decay >= 0.0) {
            return Err(ConfigError::validation(
                "weight_decay",
                "must be zero or greater",
            ));
        }
        self.training = TrainingParams {
            batch_size,
            epochs,
            learning_rate: input.learning_rate,
            optimizer: input.optimizer,
            scheduler: input.scheduler,
            weight_decay: input.weight_decay,
        };
        Ok(())
    }

    pub fn set_selection(
        &mut self,
        model_id: &str,
        dataset_id: &str,
        optimization_id: Option<&str>,
        num_gpus: Option<u32>,
    ) -> Result<(), ConfigError> {
        let model_id = model_id.trim();
        let dataset_id = dataset_id.trim();
        if model_id.is_empty() {
            return Err(ConfigError::validation("model", "Please select a model"));
        }
        if dataset_id.is_empty() {
            return Err(ConfigError::validation("dataset", "Please select a dataset"));
        }
        let num_gpus = match num_gpus {
            Some(n) if n < 1 || n > self.available_gpus => {
                return Err(ConfigError::validation(
                    "num_gpus",
                    format!("select between 1 and {} GPUs", self.available_gpus),
                ));
            }
            Some(n) => n,
            None => 1,
        };
        self.selection = Selection {
            model_id: model_id.to_string(),
            dataset_id: dataset_id.to_string(),
            optimization_id: optimization_id.unwrap_or_default().trim().to_string(),
            num_gpus,
        };
        Ok(())
    }

    /// Compose engine code and config from templates and store the result.
    pub fn generate_code(&mut self, templates: &RunTemplates) -> GeneratedCode {
        let code = GeneratedCode {
            engine_py: self.compose_engine(templates),
            config_yaml: self.compose_config(),
        };
        self.generated = Some(code.clone());
        code
    }

    /// Replace generated code, e.g. with the files already stored for an edited run.
    /// Recompose `config.yaml` from the current sections, keeping `engine.py` as it is.
    pub fn refresh_config(&mut self) {
        let config_yaml = self.compose_config();
        match &mut self.generated {
            Some(code) => code.config_yaml = config_yaml,
            None => {
                self.generated = Some(GeneratedCode {
                    engine_py: self.compose_engine(&RunTemplates::default()),
                    config_yaml,
                });
            }
        }
    }

    pub fn set_generated_code(&mut self, code: GeneratedCode) {
        self.generated = Some(code);
    }

    fn compose_engine(&self, templates: &RunTemplates) -> String {
        let s = &self.selection;
        let mut dynamic = String::from("\n");
        dynamic.push_str(&format!(
            "from model.{}.model import Model as _Model\n",
            s.model_id
        ));
        dynamic.push_str(&format!(
            "from dataset.{}.datasets import Dataset as _Dataset\n",
            s.dataset_id
        ));
        if !s.optimization_id.is_empty() {
            dynamic.push_str(&format!(
                "from optimization.{}.optimize import Optimizer as _Optimization\n",
                s.optimization_id
            ));
        }
        let devices = (0..s.num_gpus)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "\n{}\n\n{}\n# Set CUDA devices\nos.environ[\"CUDA_VISIBLE_DEVICES\"] = \"{}\"\n{}",
            templates.import_text, dynamic, devices, templates.engine_text
        )
        .trim()
        .to_string()
    }

    fn compose_config(&self) -> String {
        let t = &self.training;
        let s = &self.selection;
        format!(
            "misc:
  seed: {seed}
  log_dir: ./logs
  checkpoint_dir: ./checkpoints

training:
  epochs: {epochs}
  num_gpus: {num_gpus}
  batch_size: {batch_size}
  loss_function: CrossEntropyLoss

optimization:
  optimizer:
    name: {optimizer}
    params:
      lr: {lr}
      weight_decay: {wd}
  scheduler: {scheduler}

dataset:
  name: {dataset}
  params: {{}}

model:
  name: {model}
  params: {{}}",
            seed = MISC_SEED,
            epochs = t.epochs,
            num_gpus = s.num_gpus,
            batch_size = t.batch_size,
            optimizer = t.optimizer.class_name(),
            lr = t.learning_rate,
            wd = t.weight_decay,
            scheduler = t.scheduler.as_str(),
            dataset = s.dataset_id,
            model = s.model_id,
        )
    }

    /// Attach an auxiliary module. Without a name one is assigned as `module{N}`.
    pub fn add_module(&mut self, name: Option<&str>) -> Result<String, ConfigError> {
        let name = match name.map(str::trim) {
            Some("") => {
                return Err(ConfigError::validation("module", "Module name is required"));
            }
            Some(n) => {
                if self.modules.iter().any(|m| m.name == n) {
                    return Err(ConfigError::validation(
                        "module",
                        format!("'{n}' already exists"),
                    ));
                }
                n.to_string()
            }
            None => loop {
                self.module_counter += 1;
                let candidate = format!("module{}", self.module_counter);
                if !self.modules.iter().any(|m| m.name == candidate) {
                    break candidate;
                }
            },
        };
        self.modules.push(RunModule {
            source: format!("# {name}.py\n\n"),
            name: name.clone(),
        });
        Ok(name)
    }

    /// Update the source of an existing module (editor write-back).
    pub fn set_module_source(&mut self, name: &str, source: String) -> bool {
        match self.modules.iter_mut().find(|m| m.name == name) {
            Some(m) => {
                m.source = source;
                true
            }
            None => false,
        }
    }

    fn missing_parts(&self, project_name: &str) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if project_name.trim().is_empty() {
            missing.push("project");
        }
        if validate_run_name(&self.basic.name).is_err() {
            missing.push("name");
        }
        if self.selection.model_id.is_empty() {
            missing.push("model");
        }
        if self.selection.dataset_id.is_empty() {
            missing.push("dataset");
        }
        missing
    }

    pub fn is_submittable(&self, project_name: &str) -> bool {
        self.missing_parts(project_name).is_empty()
    }

    /// Assemble the body sent to the backend.
    pub fn to_submission_payload(
        &self,
        project_name: &str,
    ) -> Result<SubmissionPayload, ConfigError> {
        let missing = self.missing_parts(project_name);
        if !missing.is_empty() {
            return Err(ConfigError::Incomplete { missing });
        }
        let code = self.generated.clone().unwrap_or_else(|| GeneratedCode {
            engine_py: self.compose_engine(&RunTemplates::default()),
            config_yaml: self.compose_config(),
        });
        Ok(SubmissionPayload {
            project_name: project_name.trim().to_string(),
            original_run_name: None,
            run_name: self.basic.name.clone(),
            model_name: self.selection.model_id.clone(),
            dataset_name: self.selection.dataset_id.clone(),
            optimization_name: self.selection.optimization_id.clone(),
            num_gpus: self.selection.num_gpus,
            misc: RunMisc {
                seed: MISC_SEED,
                run_type: self.basic.run_type,
                description: self.basic.description.clone(),
                training: self.training,
            },
            engine_py: code.engine_py,
            config_yaml: code.config_yaml,
            modules: self.modules.clone(),
        })
    }
}

fn positive_u32(field: &'static str, value: i64) -> Result<u32, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::validation(field, "must be greater than zero"));
    }
    u32::try_from(value).map_err(|_| ConfigError::validation(field, "is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Optimizer, Scheduler};
    use pretty_assertions::assert_eq;

    fn training(batch_size: i64, epochs: i64, learning_rate: f64) -> TrainingInput {
        TrainingInput {
            batch_size,
            epochs,
            learning_rate,
            ..TrainingInput::default()
        }
    }

    fn templates() -> RunTemplates {
        RunTemplates {
            import_text: "import os\nimport torch".into(),
            engine_text: "def main():\n    pass".into(),
        }
    }

    #[test]
    fn name_rule() {
        assert!(validate_run_name("run_1").is_ok());
        assert!(validate_run_name("run-1").is_err());
        assert!(validate_run_name("import").is_err());
        assert!(validate_run_name("").is_err());
        assert!(validate_run_name("Import").is_ok());
        assert!(validate_run_name("r ün").is_err());
    }

    #[test]
    fn basic_requires_name_but_not_format() {
        let mut b = RunConfigBuilder::new(1);
        let err = b.set_basic("   ", RunType::Train, "").unwrap_err();
        assert_eq!(err.field(), Some("name"));
        assert!(b.set_basic("run-with-hyphen", RunType::Eval, "desc").is_ok());
        assert_eq!(b.basic().run_type, RunType::Eval);
    }

    #[test]
    fn training_accepts_positive_values_for_train_and_finetune() {
        for rt in [RunType::Train, RunType::Finetune] {
            for (bs, ep, lr) in [(1, 1, 1e-6), (16, 5, 0.01), (512, 1000, 3.0)] {
                let mut b = RunConfigBuilder::new(1);
                b.set_basic("r", rt, "").unwrap();
                b.set_training(&training(bs, ep, lr)).unwrap();
                assert_eq!(b.training().batch_size, bs as u32);
                assert_eq!(b.training().epochs, ep as u32);
            }
        }
    }

    #[test]
    fn training_rejects_non_positive_field_by_name() {
        let cases = [
            (training(0, 5, 0.1), "batch_size"),
            (training(-3, 5, 0.1), "batch_size"),
            (training(8, 0, 0.1), "epochs"),
            (training(8, 5, 0.0), "learning_rate"),
            (training(8, 5, -0.5), "learning_rate"),
            (training(8, 5, f64::NAN), "learning_rate"),
        ];
        for (input, field) in cases {
            let mut b = RunConfigBuilder::new(1);
            b.set_basic("r", RunType::Finetune, "").unwrap();
            let err = b.set_training(&input).unwrap_err();
            assert_eq!(err.field(), Some(field));
            assert_eq!(*b.training(), TrainingParams::default());
        }
    }

    #[test]
    fn training_is_skipped_for_eval() {
        let mut b = RunConfigBuilder::new(1);
        b.set_basic("r", RunType::Eval, "").unwrap();
        assert!(b.set_training(&training(0, 0, 0.0)).is_ok());
        assert_eq!(*b.training(), TrainingParams::default());
    }

    #[test]
    fn selection_checks_ids_and_gpu_bounds() {
        let mut b = RunConfigBuilder::new(2);
        assert_eq!(
            b.set_selection("", "CIFAR10", None, None).unwrap_err().field(),
            Some("model")
        );
        assert_eq!(
            b.set_selection("resnet50", " ", None, None)
                .unwrap_err()
                .field(),
            Some("dataset")
        );
        assert_eq!(
            b.set_selection("resnet50", "CIFAR10", None, Some(3))
                .unwrap_err()
                .field(),
            Some("num_gpus")
        );
        assert!(b.set_selection("resnet50", "CIFAR10", None, Some(0)).is_err());
        b.set_selection("resnet50", "CIFAR10", Some("quantize"), Some(2))
            .unwrap();
        assert_eq!(b.selection().num_gpus, 2);
        b.set_selection("resnet50", "CIFAR10", None, None).unwrap();
        assert_eq!(b.selection().num_gpus, 1);
    }

    #[test]
    fn generated_code_layout() {
        let mut b = RunConfigBuilder::new(4);
        b.set_selection("resnet50", "CIFAR10", Some("quantize_16bit"), Some(3))
            .unwrap();
        let code = b.generate_code(&templates());
        let expected = "import os\nimport torch\n\n\n\
from model.resnet50.model import Model as _Model\n\
from dataset.CIFAR10.datasets import Dataset as _Dataset\n\
from optimization.quantize_16bit.optimize import Optimizer as _Optimization\n\n\
# Set CUDA devices\n\
os.environ[\"CUDA_VISIBLE_DEVICES\"] = \"0, 1, 2\"\n\
def main():\n    pass";
        assert_eq!(code.engine_py, expected);
    }

    #[test]
    fn optimization_import_is_omitted_when_unselected() {
        let mut b = RunConfigBuilder::new(1);
        b.set_selection("vit_b_16", "CIFAR100", None, None).unwrap();
        let code = b.generate_code(&templates());
        assert!(!code.engine_py.contains("_Optimization"));
        assert!(code.engine_py.contains("\"0\""));
    }

    #[test]
    fn generation_is_deterministic() {
        let make = || {
            let mut b = RunConfigBuilder::new(2);
            b.set_selection("resnet50", "CIFAR10", Some("prune"), Some(2))
                .unwrap();
            b.generate_code(&templates())
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn config_yaml_carries_selection_and_training() {
        let mut b = RunConfigBuilder::new(2);
        b.set_basic("exp1", RunType::Train, "").unwrap();
        b.set_training(&TrainingInput {
            batch_size: 16,
            epochs: 5,
            learning_rate: 0.01,
            optimizer: Optimizer::Sgd,
            scheduler: Scheduler::Step,
            weight_decay: 0.0001,
        })
        .unwrap();
        b.set_selection("resnet50", "CIFAR10", None, Some(2)).unwrap();
        let code = b.generate_code(&RunTemplates::default());

        let doc: serde_yaml::Value = serde_yaml::from_str(&code.config_yaml).unwrap();
        assert_eq!(doc["training"]["num_gpus"].as_u64(), Some(2));
        assert_eq!(doc["training"]["epochs"].as_u64(), Some(5));
        assert_eq!(doc["training"]["batch_size"].as_u64(), Some(16));
        assert_eq!(doc["model"]["name"].as_str(), Some("resnet50"));
        assert_eq!(doc["dataset"]["name"].as_str(), Some("CIFAR10"));
        assert_eq!(
            doc["optimization"]["optimizer"]["name"].as_str(),
            Some("SGD")
        );
        assert_eq!(
            doc["optimization"]["optimizer"]["params"]["lr"].as_f64(),
            Some(0.01)
        );
        assert_eq!(doc["optimization"]["scheduler"].as_str(), Some("step"));
    }

    #[test]
    fn modules_are_named_in_call_order() {
        let mut b = RunConfigBuilder::new(1);
        let names: Vec<String> = (0..5).map(|_| b.add_module(None).unwrap()).collect();
        assert_eq!(names, ["module1", "module2", "module3", "module4", "module5"]);
        assert_eq!(b.modules()[0].source, "# module1.py\n\n");
        assert_eq!(b.module_count(), 5);
    }

    #[test]
    fn auto_names_skip_explicit_collisions() {
        let mut b = RunConfigBuilder::new(1);
        assert_eq!(b.add_module(Some("module1")).unwrap(), "module1");
        assert_eq!(b.add_module(None).unwrap(), "module2");
        assert!(b.add_module(Some("module2")).is_err());
        assert!(b.add_module(Some(" ")).is_err());
        assert!(b.set_module_source("module2", "x = 1".into()));
        assert!(!b.set_module_source("missing", String::new()));
    }

    #[test]
    fn payload_requires_a_submittable_config() {
        let mut b = RunConfigBuilder::new(1);
        match b.to_submission_payload("proj").unwrap_err() {
            ConfigError::Incomplete { missing } => {
                assert_eq!(missing, vec!["name", "model", "dataset"])
            }
            other => panic!("unexpected {other:?}"),
        }
        b.set_basic("run-1", RunType::Train, "").unwrap();
        b.set_selection("m", "d", None, None).unwrap();
        assert!(!b.is_submittable("proj"));
        b.set_basic("run_1", RunType::Train, "").unwrap();
        assert!(b.is_submittable("proj"));
        assert!(!b.is_submittable(""));
    }

    #[test]
    fn payload_shape() {
        let mut b = RunConfigBuilder::new(2);
        b.set_basic("exp1", RunType::Train, "first try").unwrap();
        b.set_selection("resnet50", "CIFAR10", Some("prune"), Some(2))
            .unwrap();
        b.add_module(None).unwrap();
        b.generate_code(&templates());
        let payload = b.to_submission_payload("project_1").unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["project_name"], "project_1");
        assert_eq!(json["run_name"], "exp1");
        assert_eq!(json["model_name"], "resnet50");
        assert_eq!(json["optimization_name"], "prune");
        assert_eq!(json["num_gpus"], 2);
        assert_eq!(json["misc"]["seed"], 42);
        assert_eq!(json["misc"]["run_type"], "train");
        assert_eq!(json["misc"]["description"], "first try");
        assert_eq!(json["modules"]["module1"], "# module1.py\n\n");
    }

    #[test]
    fn edit_builder_keeps_server_code() {
        let record = RunRecord {
            id: "r1".into(),
            model: "EfficientNet_B0".into(),
            dataset: "CIFAR10".into(),
            optimization: "quantize_16bit".into(),
            num_gpus: 2,
            ..RunRecord::default()
        };
        let code = GeneratedCode {
            engine_py: "print('hi')".into(),
            config_yaml: "a: 1".into(),
        };
        let b = RunConfigBuilder::from_record(&record, 4, code.clone());
        let payload = b.to_submission_payload("p").unwrap();
        assert_eq!(payload.engine_py, code.engine_py);
        assert_eq!(payload.num_gpus, 2);
        assert_eq!(payload.optimization_name, "quantize_16bit");
    }

    #[test]
    fn edit_builder_seeds_stored_misc() {
        let stored = TrainingParams {
            batch_size: 8,
            epochs: 10,
            learning_rate: 0.05,
            optimizer: Optimizer::Sgd,
            scheduler: Scheduler::Step,
            weight_decay: 0.0,
        };
        let record = RunRecord {
            id: "r1".into(),
            model: "resnet50".into(),
            dataset: "CIFAR10".into(),
            description: "warm start".into(),
            training: Some(stored),
            num_gpus: 1,
            ..RunRecord::default()
        };
        let code = GeneratedCode {
            engine_py: "print('hi')".into(),
            config_yaml: "training:\n  epochs: 10\n".into(),
        };
        let mut b = RunConfigBuilder::from_record(&record, 1, code);
        let payload = b.to_submission_payload("p").unwrap();
        assert_eq!(payload.misc.training, stored);
        assert_eq!(payload.misc.description, "warm start");

        b.set_training(&TrainingInput {
            epochs: 7,
            ..TrainingInput::from(stored)
        })
        .unwrap();
        b.refresh_config();
        let code = b.generated().unwrap();
        assert_eq!(code.engine_py, "print('hi')");
        assert!(code.config_yaml.contains("  epochs: 7\n"));
    }
}
