use crate::list_view::RunListView;
use crate::model::TrainingInput;
use crate::wizard::{WizardController, WizardStep};

pub const TAB_RUNS: usize = 0;
pub const TAB_WIZARD: usize = 1;
pub const TAB_HELP: usize = 2;

/// Input fields of the wizard, in display order per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    RunType,
    Description,
    BatchSize,
    Epochs,
    LearningRate,
    Optimizer,
    Scheduler,
    WeightDecay,
    Model,
    Dataset,
    Optimization,
    NumGpus,
}

impl Field {
    pub fn for_step(step: WizardStep) -> &'static [Field] {
        match step {
            WizardStep::Basic => &[Field::Name, Field::RunType, Field::Description],
            WizardStep::Training => &[
                Field::BatchSize,
                Field::Epochs,
                Field::LearningRate,
                Field::Optimizer,
                Field::Scheduler,
                Field::WeightDecay,
            ],
            WizardStep::Selection => &[
                Field::Model,
                Field::Dataset,
                Field::Optimization,
                Field::NumGpus,
            ],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Field::Name => "Run name",
            Field::RunType => "Type",
            Field::Description => "Description",
            Field::BatchSize => "Batch size",
            Field::Epochs => "Epochs",
            Field::LearningRate => "Learning rate",
            Field::Optimizer => "Optimizer",
            Field::Scheduler => "Scheduler",
            Field::WeightDecay => "Weight decay",
            Field::Model => "Model",
            Field::Dataset => "Dataset",
            Field::Optimization => "Optimization",
            Field::NumGpus => "GPUs",
        }
    }

    /// Name used in validation errors, for highlighting.
    pub fn error_key(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::RunType => "type",
            Field::Description => "description",
            Field::BatchSize => "batch_size",
            Field::Epochs => "epochs",
            Field::LearningRate => "learning_rate",
            Field::Optimizer => "optimizer",
            Field::Scheduler => "scheduler",
            Field::WeightDecay => "weight_decay",
            Field::Model => "model",
            Field::Dataset => "dataset",
            Field::Optimization => "optimization",
            Field::NumGpus => "num_gpus",
        }
    }

    /// Fields edited by typing, as opposed to cycling through choices.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            Field::Name
                | Field::Description
                | Field::BatchSize
                | Field::Epochs
                | Field::LearningRate
                | Field::WeightDecay
                | Field::NumGpus
        )
    }
}

/// Numeric fields as typed. Parsed into the wizard draft before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberBuffers {
    pub batch_size: String,
    pub epochs: String,
    pub learning_rate: String,
    pub weight_decay: String,
    pub num_gpus: String,
}

impl NumberBuffers {
    pub fn from_wizard(w: &WizardController) -> Self {
        let t = &w.draft.training;
        Self {
            batch_size: t.batch_size.to_string(),
            epochs: t.epochs.to_string(),
            learning_rate: t.learning_rate.to_string(),
            weight_decay: t.weight_decay.to_string(),
            num_gpus: w.draft.num_gpus.unwrap_or(1).to_string(),
        }
    }
}

pub struct UiState {
    pub tab: usize,
    pub info: String,
    pub list: RunListView,
    pub wizard: WizardController,
    pub field: usize,
    pub numbers: NumberBuffers,
    pub available_gpus: u32,
    pub log_scroll: usize,
}

impl UiState {
    pub fn new(project: Option<String>, available_gpus: u32) -> Self {
        let wizard = WizardController::new(project.clone().unwrap_or_default(), available_gpus);
        Self {
            tab: TAB_RUNS,
            info: String::new(),
            list: RunListView::new(project),
            numbers: NumberBuffers::from_wizard(&wizard),
            wizard,
            field: 0,
            available_gpus,
            log_scroll: 0,
        }
    }

    pub fn fields(&self) -> &'static [Field] {
        Field::for_step(self.wizard.step())
    }

    pub fn current_field(&self) -> Field {
        let fields = self.fields();
        fields[self.field.min(fields.len() - 1)]
    }

    /// Replace the wizard and resync the typed buffers.
    pub fn open_wizard(&mut self, wizard: WizardController) {
        self.numbers = NumberBuffers::from_wizard(&wizard);
        self.wizard = wizard;
        self.field = 0;
    }

    pub fn reset_wizard(&mut self) {
        self.wizard.reset();
        self.numbers = NumberBuffers::from_wizard(&self.wizard);
        self.field = 0;
    }

    /// Copy typed numbers into the draft. Unparseable input becomes a value the
    /// builder rejects, so the error names the right field.
    pub fn sync_numbers(&mut self) {
        let n = &self.numbers;
        let d = &mut self.wizard.draft;
        d.training = TrainingInput {
            batch_size: n.batch_size.trim().parse().unwrap_or(0),
            epochs: n.epochs.trim().parse().unwrap_or(0),
            learning_rate: n.learning_rate.trim().parse().unwrap_or(f64::NAN),
            weight_decay: n.weight_decay.trim().parse().unwrap_or(f64::NAN),
            ..d.training
        };
        d.num_gpus = Some(n.num_gpus.trim().parse().unwrap_or(0));
    }

    pub fn text_buffer(&mut self, field: Field) -> Option<&mut String> {
        let n = &mut self.numbers;
        let d = &mut self.wizard.draft;
        match field {
            Field::Name => Some(&mut d.name),
            Field::Description => Some(&mut d.description),
            Field::BatchSize => Some(&mut n.batch_size),
            Field::Epochs => Some(&mut n.epochs),
            Field::LearningRate => Some(&mut n.learning_rate),
            Field::WeightDecay => Some(&mut n.weight_decay),
            Field::NumGpus => Some(&mut n.num_gpus),
            _ => None,
        }
    }

    /// Current display value of a field.
    pub fn field_value(&self, field: Field) -> String {
        let d = &self.wizard.draft;
        let n = &self.numbers;
        let choice = |id: &str| {
            if id.is_empty() {
                "(none)".to_string()
            } else {
                id.to_string()
            }
        };
        match field {
            Field::Name => d.name.clone(),
            Field::RunType => d.run_type.as_str().to_string(),
            Field::Description => d.description.clone(),
            Field::BatchSize => n.batch_size.clone(),
            Field::Epochs => n.epochs.clone(),
            Field::LearningRate => n.learning_rate.clone(),
            Field::Optimizer => d.training.optimizer.as_str().to_string(),
            Field::Scheduler => d.training.scheduler.as_str().to_string(),
            Field::WeightDecay => n.weight_decay.clone(),
            Field::Model => choice(&d.model_id),
            Field::Dataset => choice(&d.dataset_id),
            Field::Optimization => choice(&d.optimization_id),
            Field::NumGpus => n.num_gpus.clone(),
        }
    }

    /// Step a choice field forward or backward.
    pub fn cycle_field(&mut self, field: Field, forward: bool) {
        let catalog = self.wizard.catalog().clone();
        let d = &mut self.wizard.draft;
        match field {
            Field::RunType => d.run_type = d.run_type.cycle(forward),
            Field::Optimizer => d.training.optimizer = d.training.optimizer.cycle(forward),
            Field::Scheduler => d.training.scheduler = d.training.scheduler.cycle(forward),
            Field::Model => {
                d.model_id = WizardController::cycle_choice(&d.model_id, &catalog.models, forward)
            }
            Field::Dataset => {
                d.dataset_id =
                    WizardController::cycle_choice(&d.dataset_id, &catalog.datasets, forward)
            }
            Field::Optimization => {
                d.optimization_id = WizardController::cycle_choice(
                    &d.optimization_id,
                    &catalog.optimizations,
                    forward,
                )
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Optimizer, RunType, Scheduler};

    #[test]
    fn typed_numbers_reach_the_draft() {
        let mut s = UiState::new(Some("p".into()), 2);
        s.numbers.batch_size = "16".into();
        s.numbers.learning_rate = "abc".into();
        s.numbers.num_gpus = " 2 ".into();
        s.sync_numbers();
        assert_eq!(s.wizard.draft.training.batch_size, 16);
        assert!(s.wizard.draft.training.learning_rate.is_nan());
        assert_eq!(s.wizard.draft.num_gpus, Some(2));
    }

    #[test]
    fn choice_fields_cycle_both_ways() {
        let mut s = UiState::new(None, 1);
        s.cycle_field(Field::RunType, true);
        assert_eq!(s.wizard.draft.run_type, RunType::Finetune);
        s.cycle_field(Field::RunType, false);
        s.cycle_field(Field::RunType, false);
        assert_eq!(s.wizard.draft.run_type, RunType::Inference);
        s.cycle_field(Field::Optimizer, false);
        assert_eq!(s.wizard.draft.training.optimizer, Optimizer::RmsProp);
        s.cycle_field(Field::Scheduler, true);
        assert_eq!(s.wizard.draft.training.scheduler, Scheduler::Step);
        assert_eq!(s.field_value(Field::Model), "(none)");
    }

    #[test]
    fn field_index_is_clamped_per_step() {
        let mut s = UiState::new(None, 1);
        s.field = 5;
        assert_eq!(s.current_field(), Field::Description);
    }
}
