//! Training loop for the noma screening classifier.
//!
//! One run walks `Initializing -> (TrainingEpoch -> Validating) x epochs ->
//! Finalizing -> Done`. Every epoch draws a class-balanced plan, trains on it
//! with the class-weighted loss and AdamW, steps the cosine schedule, runs a
//! validation pass and persists the metrics. The checkpoint is replaced
//! whenever validation accuracy improves.

use std::fmt;
use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use noma_core::{
    EpochMetrics, Error, ReproducibilityController, Result, RngStream, TrainingConfiguration,
};
use noma_dataset::{
    BatchLoader, DatasetPreparer, ImbalanceSampler, NomaBatch, NomaBatcher, TrainingSet,
};
use tracing::{debug, info};

use crate::checkpoint::{CheckpointManager, CheckpointState};
use crate::evaluator::Evaluator;
use crate::loss::ClassWeightedLoss;
use crate::lr_schedule::CosineAnnealingScheduler;
use crate::model::{ClassifierBuilder, NomaClassifier, MIN_CLASSES};

const ADAM_EPSILON: f32 = 1e-8;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initializing,
    TrainingEpoch(usize),
    Validating(usize),
    Finalizing,
    Done,
}

impl fmt::Display for TrainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerState::Initializing => write!(f, "initializing"),
            TrainerState::TrainingEpoch(epoch) => write!(f, "training epoch {epoch}"),
            TrainerState::Validating(epoch) => write!(f, "validating epoch {epoch}"),
            TrainerState::Finalizing => write!(f, "finalizing"),
            TrainerState::Done => write!(f, "done"),
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs_completed: usize,
    pub best_accuracy: f64,
    pub best_epoch: usize,
    pub checkpoint_path: PathBuf,
    pub metrics_path: PathBuf,
    pub class_map_path: PathBuf,
    /// Per-epoch records, in order
    pub history: Vec<EpochMetrics>,
    /// Training samples consumed by each epoch, in order
    pub draws_per_epoch: Vec<usize>,
}

/// Running totals of one training epoch.
#[derive(Debug, Default, Clone, Copy)]
struct EpochTotals {
    loss_sum: f64,
    correct: usize,
    total: usize,
}

impl EpochTotals {
    fn loss(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.loss_sum / self.total as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Drives a full training run on backend `B`.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfiguration,
    device: B::Device,
    state: TrainerState,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfiguration, device: B::Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            state: TrainerState::Initializing,
        })
    }

    pub fn config(&self) -> &TrainingConfiguration {
        &self.config
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Run every epoch, then write the class mapping.
    ///
    /// Any failure aborts the run. Files from epochs that completed before
    /// the failure are left as they were.
    pub fn run(&mut self) -> Result<TrainingSummary> {
        let config = self.config.clone();
        let device = self.device.clone();
        self.state = TrainerState::Initializing;

        let controller = ReproducibilityController::apply::<B>(config.seed);
        info!("Seed: {}", controller.seed());

        let data = DatasetPreparer::from_config(&config, controller).prepare()?;
        data.catalog.require_at_least(MIN_CLASSES)?;
        let num_classes = data.catalog.len();

        let sampler = ImbalanceSampler::new(&data.train.folder().labels(), num_classes)?;
        info!(
            "Class weights: {}",
            data.catalog
                .names()
                .iter()
                .zip(sampler.weights().as_slice())
                .map(|(name, w)| format!("{name}={w:.6}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let criterion = ClassWeightedLoss::<B>::new(sampler.weights(), &device);

        let mut model = ClassifierBuilder::new(config.backbone, num_classes)
            .with_image_size(config.image_size)
            .with_pretrained(config.pretrained_weights.clone())
            .build::<B>(&device)?;
        let mut optimizer = AdamWConfig::new()
            .with_weight_decay(config.weight_decay as f32)
            .with_epsilon(ADAM_EPSILON)
            .init::<B, NomaClassifier<B>>();
        let mut scheduler = CosineAnnealingScheduler::new(config.learning_rate, config.epochs);

        let loader = BatchLoader::new(
            config.worker_threads(),
            config.batch_size,
            config.prefetch_batches,
        )?;
        let evaluator = Evaluator::new(&loader, config.image_size);
        let mut checkpoints = CheckpointManager::new(&config.output_dir)?;
        let mut sampler_rng = controller.rng(RngStream::Sampler);

        info!(
            "Training {} on {} images ({} val) for {} epochs",
            config.backbone,
            data.train.len(),
            data.val.len(),
            config.epochs
        );

        let mut history = Vec::with_capacity(config.epochs);
        let mut draws_per_epoch = Vec::with_capacity(config.epochs);
        let mut best_epoch = 0;

        for epoch in 1..=config.epochs {
            self.state = TrainerState::TrainingEpoch(epoch);
            let lr = scheduler.current_lr();
            let plan = sampler.draw_plan(&mut sampler_rng);
            debug!("Epoch {epoch}: {} draws, lr {lr:.3e}", plan.len());

            let (trained, totals) = train_epoch(
                model,
                &mut optimizer,
                &criterion,
                &EpochInputs {
                    epoch,
                    lr,
                    plan: &plan,
                    train: &data.train,
                    loader: &loader,
                    batcher: &NomaBatcher::new(config.image_size),
                    progress: config.progress,
                },
                &device,
            )?;
            model = trained;
            draws_per_epoch.push(totals.total);
            scheduler.step();

            self.state = TrainerState::Validating(epoch);
            let inference_model = model.valid();
            let eval = evaluator.evaluate(&inference_model, &data.val, &device)?;

            let record = EpochMetrics {
                epoch,
                train_loss: totals.loss(),
                train_acc: totals.accuracy(),
                val_loss: eval.loss,
                val_acc: eval.accuracy,
                val_report: eval.report,
                val_confusion_matrix: eval.confusion_matrix,
                class_names: data.catalog.names().to_vec(),
            };
            checkpoints.write_metrics(&record)?;

            info!(
                "Epoch {epoch}/{}: train_loss {:.4} train_acc {:.4} | val_loss {:.4} val_acc {:.4}",
                config.epochs, record.train_loss, record.train_acc, record.val_loss, record.val_acc
            );

            let saved = checkpoints.save_if_best(
                record.val_acc,
                CheckpointState {
                    epoch,
                    model: &inference_model,
                    catalog: &data.catalog,
                    image_size: config.image_size,
                },
            )?;
            if saved {
                best_epoch = epoch;
            }
            history.push(record);
        }

        self.state = TrainerState::Finalizing;
        let class_map_path = checkpoints.write_class_mapping(&data.catalog)?;
        let best_accuracy = checkpoints.best_accuracy().unwrap_or_default();
        info!(
            "Training complete. Best val_acc {best_accuracy:.4} at epoch {best_epoch}, \
             checkpoint {}",
            checkpoints.checkpoint_path().display()
        );

        self.state = TrainerState::Done;
        Ok(TrainingSummary {
            epochs_completed: history.len(),
            best_accuracy,
            best_epoch,
            checkpoint_path: checkpoints.checkpoint_path(),
            metrics_path: checkpoints.metrics_path(),
            class_map_path,
            history,
            draws_per_epoch,
        })
    }
}

/// Read-only inputs of one training epoch.
struct EpochInputs<'a> {
    epoch: usize,
    lr: f64,
    plan: &'a [usize],
    train: &'a TrainingSet,
    loader: &'a BatchLoader,
    batcher: &'a NomaBatcher,
    progress: bool,
}

fn train_epoch<B, O>(
    mut model: NomaClassifier<B>,
    optimizer: &mut O,
    criterion: &ClassWeightedLoss<B>,
    inputs: &EpochInputs<'_>,
    device: &B::Device,
) -> Result<(NomaClassifier<B>, EpochTotals)>
where
    B: AutodiffBackend,
    O: Optimizer<NomaClassifier<B>, B>,
{
    let num_batches = inputs.loader.num_batches(inputs.plan.len());
    let bar = progress_bar(inputs.progress, num_batches, inputs.epoch);
    let mut totals = EpochTotals::default();
    let mut batch_index = 0usize;

    inputs.loader.for_each_batch(
        inputs.plan,
        |position, index| inputs.train.item(inputs.epoch, position, index),
        |items| {
            let batch: NomaBatch<B> = inputs.batcher.batch(items, device);
            let batch_size = batch.targets.dims()[0];

            let logits = model.forward(batch.images);
            let loss = criterion.forward(logits.clone(), batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(Error::Training(format!(
                    "non-finite loss {loss_value} at epoch {} batch {}",
                    inputs.epoch,
                    batch_index + 1
                )));
            }

            let predictions = logits.argmax(1).squeeze::<1>(1);
            let batch_correct: i64 = predictions
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(inputs.lr, model.clone(), grads);

            totals.loss_sum += loss_value * batch_size as f64;
            totals.correct += batch_correct as usize;
            totals.total += batch_size;
            batch_index += 1;

            if batch_index % 10 == 0 || batch_index == num_batches {
                debug!(
                    "  Batch {batch_index}/{num_batches}: loss = {loss_value:.4}, acc = {:.4}",
                    totals.accuracy()
                );
            }
            bar.inc(1);
            Ok(())
        },
    )?;

    bar.finish_and_clear();
    Ok((model, totals))
}

fn progress_bar(enabled: bool, num_batches: usize, epoch: usize) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(num_batches as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_message(format!("epoch {epoch}"));
    bar
}
