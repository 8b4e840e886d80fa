//! Fixed-size `(images, labels)` batches over local files or remote keys.

use crate::dataset::LabelRule;
use crate::error::{TrainingError, TrainingResult};
use crate::preprocess::{Augmentation, ImageSpec, ImageTensor, decode_augmented, decode_image};
use async_trait::async_trait;
use ember_abstraction::ObjectStore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Vec<ImageTensor>,
    /// 1 for the positive class, 0 otherwise.
    pub labels: Vec<u8>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Seeds the shuffle; entropy when absent.
    pub seed: Option<u64>,
    pub image: ImageSpec,
    pub labels: LabelRule,
    /// Jitter for training providers. Validation and evaluation leave it unset.
    pub augmentation: Option<Augmentation>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            seed: None,
            image: ImageSpec::default(),
            labels: LabelRule::default(),
            augmentation: None,
        }
    }
}

/// Finite, re-iterable batch sequence consumed one batch at a time.
///
/// Trailing items that do not fill a whole batch are never served.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// `floor(items / batch_size)`.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn batch_size(&self) -> usize;

    /// Decodes the `index`-th window of the current ordering.
    async fn get_batch(&self, index: usize) -> TrainingResult<Batch>;

    /// Reshuffles when shuffling is enabled.
    fn on_epoch_end(&mut self);
}

/// Items plus the current permutation over them.
struct Ordering<T> {
    items: Vec<T>,
    order: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
    /// Completed epochs; feeds the augmentation draws.
    epoch: u64,
}

impl<T> Ordering<T> {
    fn new(items: Vec<T>, options: &BatchOptions) -> TrainingResult<Self> {
        if options.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        let rng = options.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let mut ordering = Self {
            order: (0..items.len()).collect(),
            items,
            batch_size: options.batch_size,
            shuffle: options.shuffle,
            rng,
            epoch: 0,
        };
        ordering.reshuffle();
        Ok(ordering)
    }

    fn len(&self) -> usize {
        self.items.len() / self.batch_size
    }

    fn reshuffle(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    fn next_epoch(&mut self) {
        self.epoch += 1;
        self.reshuffle();
    }

    fn window(&self, index: usize) -> TrainingResult<impl Iterator<Item = &T>> {
        let length = self.len();
        if index >= length {
            return Err(TrainingError::BatchOutOfRange { index, length });
        }
        let start = index * self.batch_size;
        Ok(self.order[start..start + self.batch_size].iter().map(|&i| &self.items[i]))
    }
}

/// Decodes items, drawing augmentation from a per-(epoch, batch) seed.
///
/// Re-reading a batch within an epoch yields the same images.
struct Decoder {
    image: ImageSpec,
    augmentation: Option<Augmentation>,
    seed: u64,
}

impl Decoder {
    fn new(options: &BatchOptions) -> Self {
        Self {
            image: options.image,
            augmentation: options.augmentation,
            seed: options.seed.unwrap_or_else(rand::random),
        }
    }

    fn rng(&self, epoch: u64, index: usize) -> StdRng {
        let stream = (epoch << 32) ^ index as u64;
        StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn decode(&self, bytes: &[u8], item: &str, rng: &mut StdRng) -> TrainingResult<ImageTensor> {
        match &self.augmentation {
            Some(augmentation) => decode_augmented(bytes, &self.image, item, augmentation, rng),
            None => decode_image(bytes, &self.image, item),
        }
    }
}

/// Batches decoded from files on local disk.
pub struct LocalImageBatches {
    ordering: Ordering<PathBuf>,
    decoder: Decoder,
    labels: LabelRule,
}

impl LocalImageBatches {
    pub fn new(paths: Vec<PathBuf>, options: BatchOptions) -> TrainingResult<Self> {
        Ok(Self {
            ordering: Ordering::new(paths, &options)?,
            decoder: Decoder::new(&options),
            labels: options.labels,
        })
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.ordering.items.len()
    }
}

#[async_trait]
impl BatchProvider for LocalImageBatches {
    fn len(&self) -> usize {
        self.ordering.len()
    }

    fn batch_size(&self) -> usize {
        self.ordering.batch_size
    }

    async fn get_batch(&self, index: usize) -> TrainingResult<Batch> {
        let mut batch = Batch { images: Vec::new(), labels: Vec::new() };
        let mut rng = self.decoder.rng(self.ordering.epoch, index);
        for path in self.ordering.window(index)? {
            let name = path.display().to_string();
            let bytes = tokio::fs::read(path).await?;
            batch.images.push(self.decoder.decode(&bytes, &name, &mut rng)?);
            batch.labels.push(self.labels.label_for(&name).as_u8());
        }
        trace!(index, size = batch.len(), "Loaded local batch");
        Ok(batch)
    }

    fn on_epoch_end(&mut self) {
        self.ordering.next_epoch();
    }
}

/// Batches streamed object by object from the store on demand.
pub struct RemoteImageBatches {
    store: Arc<dyn ObjectStore>,
    ordering: Ordering<String>,
    decoder: Decoder,
    labels: LabelRule,
}

impl RemoteImageBatches {
    pub fn new(store: Arc<dyn ObjectStore>, keys: Vec<String>, options: BatchOptions) -> TrainingResult<Self> {
        Ok(Self {
            store,
            ordering: Ordering::new(keys, &options)?,
            decoder: Decoder::new(&options),
            labels: options.labels,
        })
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.ordering.items.len()
    }
}

#[async_trait]
impl BatchProvider for RemoteImageBatches {
    fn len(&self) -> usize {
        self.ordering.len()
    }

    fn batch_size(&self) -> usize {
        self.ordering.batch_size
    }

    async fn get_batch(&self, index: usize) -> TrainingResult<Batch> {
        let mut batch = Batch { images: Vec::new(), labels: Vec::new() };
        let mut rng = self.decoder.rng(self.ordering.epoch, index);
        for key in self.ordering.window(index)? {
            let bytes = self.store.get_bytes(key).await?;
            batch.images.push(self.decoder.decode(&bytes, key, &mut rng)?);
            batch.labels.push(self.labels.label_for(key).as_u8());
        }
        trace!(index, size = batch.len(), "Streamed remote batch");
        Ok(batch)
    }

    fn on_epoch_end(&mut self) {
        self.ordering.next_epoch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{Normalization, solid_png};
    use ember_abstraction::{MemoryObjectStore, StorageError};
    use tempfile::TempDir;

    fn tiny_options(batch_size: usize, shuffle: bool) -> BatchOptions {
        BatchOptions {
            batch_size,
            shuffle,
            seed: Some(481),
            image: ImageSpec { width: 2, height: 2, ..ImageSpec::default() },
            labels: LabelRule::default(),
            augmentation: None,
        }
    }

    fn remote_fixture(count: usize) -> (Arc<MemoryObjectStore>, Vec<String>) {
        let store = MemoryObjectStore::new("data");
        let png = solid_png(3, 3, [200, 50, 10]);
        let mut keys = Vec::new();
        for i in 0..count {
            let class = if i % 2 == 0 { "fire" } else { "nofire" };
            let key = format!("training/{class}/{i}.png");
            store.insert(key.clone(), png.clone());
            keys.push(key);
        }
        (Arc::new(store), keys)
    }

    #[tokio::test]
    async fn test_length_drops_remainder_and_refuses_out_of_range() {
        let (store, keys) = remote_fixture(100);
        let batches = RemoteImageBatches::new(store, keys, tiny_options(32, true)).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.item_count(), 100);

        let err = batches.get_batch(3).await.unwrap_err();
        assert!(matches!(err, TrainingError::BatchOutOfRange { index: 3, length: 3 }));
    }

    #[tokio::test]
    async fn test_remote_batch_labels_follow_keys() {
        let (store, keys) = remote_fixture(4);
        let batches = RemoteImageBatches::new(store.clone(), keys, tiny_options(4, false)).unwrap();
        let batch = batches.get_batch(0).await.unwrap();
        assert_eq!(batch.labels, vec![1, 0, 1, 0]);
        assert_eq!(batch.images.len(), 4);
        assert_eq!(batch.images[0].data.len(), 2 * 2 * 3);
        assert_eq!(store.calls().get_bytes, 4);
    }

    #[tokio::test]
    async fn test_missing_remote_item_fails_the_batch() {
        let (store, mut keys) = remote_fixture(3);
        keys.push("training/fire/gone.png".to_string());
        let batches = RemoteImageBatches::new(store, keys, tiny_options(4, false)).unwrap();
        let err = batches.get_batch(0).await.unwrap_err();
        assert!(matches!(err, TrainingError::Storage(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_epoch_end_reshuffles_only_when_enabled() {
        let (store, keys) = remote_fixture(40);

        let mut fixed = RemoteImageBatches::new(store.clone(), keys.clone(), tiny_options(40, false)).unwrap();
        let before = fixed.ordering.order.clone();
        fixed.on_epoch_end();
        assert_eq!(fixed.ordering.order, before);
        assert_eq!(before, (0..40).collect::<Vec<_>>());

        let mut shuffled = RemoteImageBatches::new(store, keys, tiny_options(40, true)).unwrap();
        let before = shuffled.ordering.order.clone();
        shuffled.on_epoch_end();
        assert_ne!(shuffled.ordering.order, before);

        let mut sorted = shuffled.ordering.order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_local_batches_decode_files() {
        let temp = TempDir::new().unwrap();
        let fire = temp.path().join("fire");
        std::fs::create_dir_all(&fire).unwrap();
        let mut paths = Vec::new();
        for i in 0..5 {
            let path = fire.join(format!("{i}.png"));
            std::fs::write(&path, solid_png(4, 4, [10, 10, 10])).unwrap();
            paths.push(path);
        }

        let batches = LocalImageBatches::new(paths, tiny_options(2, true)).unwrap();
        assert_eq!(batches.len(), 2);
        let batch = batches.get_batch(1).await.unwrap();
        assert_eq!(batch.labels, vec![1, 1]);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(LocalImageBatches::new(Vec::new(), tiny_options(0, false)).is_err());
    }

    fn split_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            if x < width / 2 { image::Rgb([250, 20, 10]) } else { image::Rgb([10, (y * 30) as u8, 240]) }
        });
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn split_files(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
        std::fs::create_dir_all(dir).unwrap();
        (0..count)
            .map(|i| {
                let path = dir.join(format!("{i}.png"));
                std::fs::write(&path, split_png(8, 8)).unwrap();
                path
            })
            .collect()
    }

    fn augmented_options(augmentation: Option<Augmentation>) -> BatchOptions {
        BatchOptions {
            batch_size: 2,
            shuffle: false,
            seed: Some(481),
            image: ImageSpec { width: 8, height: 8, normalization: Normalization::UnitRange },
            labels: LabelRule::default(),
            augmentation,
        }
    }

    #[tokio::test]
    async fn test_unaugmented_batches_match_plain_decode() {
        let temp = TempDir::new().unwrap();
        let paths = split_files(&temp.path().join("fire"), 2);
        let options = augmented_options(None);
        let plain: Vec<ImageTensor> = paths
            .iter()
            .map(|p| decode_image(&std::fs::read(p).unwrap(), &options.image, "x").unwrap())
            .collect();

        let mut batches = LocalImageBatches::new(paths, options).unwrap();
        assert_eq!(batches.get_batch(0).await.unwrap().images, plain);
        batches.on_epoch_end();
        assert_eq!(batches.get_batch(0).await.unwrap().images, plain);
    }

    #[tokio::test]
    async fn test_augmented_batches_are_stable_within_an_epoch_and_vary_across() {
        let temp = TempDir::new().unwrap();
        let paths = split_files(&temp.path().join("fire"), 2);
        let options = augmented_options(Some(Augmentation::default()));
        let plain = decode_image(&std::fs::read(&paths[0]).unwrap(), &options.image, "x").unwrap();

        let mut batches = LocalImageBatches::new(paths, options).unwrap();
        let first = batches.get_batch(0).await.unwrap();
        assert_eq!(batches.get_batch(0).await.unwrap(), first);
        assert_eq!(first.labels, vec![1, 1]);

        let mut seen = vec![first.images[0].clone()];
        for _ in 0..4 {
            batches.on_epoch_end();
            seen.push(batches.get_batch(0).await.unwrap().images[0].clone());
        }
        assert!(seen.iter().any(|img| *img != plain));
        assert!(seen.windows(2).any(|w| w[0] != w[1]));
    }
}
