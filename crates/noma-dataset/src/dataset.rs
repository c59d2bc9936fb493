//! Burn integration: items, batches and the prefetching batch loader.
//!
//! Images are decoded and transformed on a fixed-size rayon pool. A producer
//! thread keeps up to `prefetch` batches ready ahead of the training step.
//! Batches are delivered in plan order, so results do not depend on how the
//! work was scheduled across threads.

use std::sync::mpsc;
use std::thread;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::TensorData;
use noma_core::{
    Error, ImageSample, ReproducibilityController, Result, RngStream, IMAGENET_MEAN, IMAGENET_STD,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::loader::{load_image, ImageFolder};
use crate::transforms::{EvalTransform, TrainTransform};

/// One transformed sample: CHW pixels in `[0, 1]` and its class index.
#[derive(Debug, Clone)]
pub struct NomaItem {
    pub image: Vec<f32>,
    pub label: usize,
}

/// A batch ready for the network.
#[derive(Debug, Clone)]
pub struct NomaBatch<B: Backend> {
    /// Normalized images `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// Class indices `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items into tensors on the target device and applies ImageNet
/// normalization.
#[derive(Clone, Debug)]
pub struct NomaBatcher {
    image_size: usize,
}

impl NomaBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, NomaItem, NomaBatch<B>> for NomaBatcher {
    fn batch(&self, items: Vec<NomaItem>, device: &B::Device) -> NomaBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let images = (images - mean) / std;

        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        NomaBatch { images, targets }
    }
}

/// Training split with its randomized pipeline.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    folder: ImageFolder,
    transform: TrainTransform,
    controller: ReproducibilityController,
}

impl TrainingSet {
    pub fn new(
        folder: ImageFolder,
        transform: TrainTransform,
        controller: ReproducibilityController,
    ) -> Self {
        Self {
            folder,
            transform,
            controller,
        }
    }

    pub fn folder(&self) -> &ImageFolder {
        &self.folder
    }

    pub fn len(&self) -> usize {
        self.folder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folder.is_empty()
    }

    pub fn image_size(&self) -> usize {
        self.transform.image_size()
    }

    /// Load the sample at `index`, drawn at `position` of the epoch plan.
    /// Augmentation randomness depends only on `(seed, epoch, position)`.
    pub fn item(&self, epoch: usize, position: usize, index: usize) -> Result<NomaItem> {
        let sample = sample_at(self.folder.samples(), index)?;
        let seed = self
            .controller
            .item_seed(RngStream::Augmentation, epoch, position);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let img = load_image(&sample.path)?;
        Ok(NomaItem {
            image: self.transform.apply(&img, &mut rng),
            label: sample.label,
        })
    }
}

/// Validation split with its deterministic pipeline.
#[derive(Debug, Clone)]
pub struct ValidationSet {
    folder: ImageFolder,
    transform: EvalTransform,
}

impl ValidationSet {
    pub fn new(folder: ImageFolder, transform: EvalTransform) -> Self {
        Self { folder, transform }
    }

    pub fn folder(&self) -> &ImageFolder {
        &self.folder
    }

    pub fn len(&self) -> usize {
        self.folder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folder.is_empty()
    }

    pub fn image_size(&self) -> usize {
        self.transform.image_size()
    }

    /// Fixed iteration order: every sample once, in discovery order.
    pub fn plan(&self) -> Vec<usize> {
        (0..self.len()).collect()
    }

    pub fn item(&self, index: usize) -> Result<NomaItem> {
        let sample = sample_at(self.folder.samples(), index)?;
        let img = load_image(&sample.path)?;
        Ok(NomaItem {
            image: self.transform.apply(&img),
            label: sample.label,
        })
    }
}

fn sample_at(samples: &[ImageSample], index: usize) -> Result<&ImageSample> {
    samples.get(index).ok_or_else(|| {
        Error::Training(format!("sample index {index} out of range ({})", samples.len()))
    })
}

/// Batches a plan of dataset indices with parallel decoding and prefetch.
pub struct BatchLoader {
    pool: rayon::ThreadPool,
    batch_size: usize,
    prefetch: usize,
}

impl BatchLoader {
    pub fn new(num_workers: usize, batch_size: usize, prefetch: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("noma-loader-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("failed to start loader pool: {e}")))?;

        Ok(Self {
            pool,
            batch_size,
            prefetch: prefetch.max(1),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self, plan_len: usize) -> usize {
        plan_len.div_ceil(self.batch_size)
    }

    /// Load `plan` in batches and hand each batch to `consume`, in order.
    ///
    /// `load(position, index)` produces one item; it runs on the worker pool.
    /// The first error from either side stops the pass and is returned.
    pub fn for_each_batch<L, C>(&self, plan: &[usize], load: L, mut consume: C) -> Result<()>
    where
        L: Fn(usize, usize) -> Result<NomaItem> + Sync,
        C: FnMut(Vec<NomaItem>) -> Result<()>,
    {
        let batch_size = self.batch_size;
        let pool = &self.pool;
        let load = &load;

        thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<Result<Vec<NomaItem>>>(self.prefetch);

            scope.spawn(move || {
                for (batch_index, chunk) in plan.chunks(batch_size).enumerate() {
                    let start = batch_index * batch_size;
                    let items: Result<Vec<NomaItem>> = pool.install(|| {
                        chunk
                            .par_iter()
                            .enumerate()
                            .map(|(offset, &index)| load(start + offset, index))
                            .collect()
                    });
                    let failed = items.is_err();
                    if tx.send(items).is_err() || failed {
                        break;
                    }
                }
            });

            for (batch_index, items) in rx.into_iter().enumerate() {
                let items = items?;
                debug!("Batch {batch_index}: {} items", items.len());
                consume(items)?;
            }
            Ok(())
        })
    }
}
