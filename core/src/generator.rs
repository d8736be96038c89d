use crate::TrainError;
use cnn_dssm_backend_core::{BackendError, Batch, DataGenerator, InputShape, Mode};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One pre-tokenized training example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub query: Vec<u32>,
    pub positive: Vec<u32>,
    pub negatives: Vec<Vec<u32>>,
}

impl Example {
    /// Pad with index 0 or truncate every sequence to the configured lengths
    fn fit(mut self, shape: &InputShape) -> Self {
        self.query.resize(shape.query_length, 0);
        self.positive.resize(shape.document_length, 0);
        for negative in self.negatives.iter_mut() {
            negative.resize(shape.document_length, 0);
        }
        self
    }
}

/// Read one JSON example per line. Blank lines are skipped.
pub fn read_examples(path: &Path) -> Result<Vec<Example>, TrainError> {
    let file = File::open(path)?;
    let mut examples = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let example = serde_json::from_str(&line).map_err(|err| {
            TrainError::Data(format!("{}:{}: {err}", path.display(), i + 1))
        })?;
        examples.push(example);
    }
    tracing::info!("Read {} examples from {}", examples.len(), path.display());
    Ok(examples)
}

/// Serves fixed-size batches from examples held in memory.
///
/// Examples are visited in order. A pass ends with a smaller batch when the number of examples
/// is not a multiple of the batch size. After `passes` full passes the generator is exhausted.
#[derive(Debug)]
pub struct InMemoryGenerator {
    examples: Vec<Example>,
    shape: InputShape,
    batch_size: usize,
    mode: Mode,
    passes: usize,
    pass: usize,
    cursor: usize,
}

impl InMemoryGenerator {
    pub fn new(
        examples: Vec<Example>,
        shape: InputShape,
        batch_size: usize,
        mode: Mode,
        passes: usize,
    ) -> Result<Self, TrainError> {
        if batch_size == 0 {
            return Err(TrainError::Config("`batch_size` must be at least 1".to_string()));
        }
        if passes == 0 {
            return Err(TrainError::Config(
                "`generator_epochs` must be at least 1".to_string(),
            ));
        }
        if examples.is_empty() {
            return Err(TrainError::Data(format!("{mode} data is empty")));
        }
        if let Some(i) = examples
            .iter()
            .position(|e| e.negatives.len() != shape.num_negatives)
        {
            return Err(TrainError::Data(format!(
                "{mode} example {} has {} negative documents, expected {}",
                i + 1,
                examples[i].negatives.len(),
                shape.num_negatives
            )));
        }

        let examples = examples.into_iter().map(|e| e.fit(&shape)).collect();
        Ok(Self {
            examples,
            shape,
            batch_size,
            mode,
            passes,
            pass: 0,
            cursor: 0,
        })
    }

    pub fn from_jsonl(
        path: &Path,
        shape: InputShape,
        batch_size: usize,
        mode: Mode,
        passes: usize,
    ) -> Result<Self, TrainError> {
        Self::new(read_examples(path)?, shape, batch_size, mode, passes)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

impl DataGenerator for InMemoryGenerator {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn next_batch(&mut self) -> Result<Batch, BackendError> {
        if self.pass >= self.passes {
            return Err(BackendError::Batch(format!(
                "{} generator is exhausted after {} passes",
                self.mode, self.passes
            )));
        }

        let end = (self.cursor + self.batch_size).min(self.examples.len());
        let examples = &self.examples[self.cursor..end];

        let mut batch = Batch {
            query: Vec::with_capacity(examples.len() * self.shape.query_length),
            positive: Vec::with_capacity(examples.len() * self.shape.document_length),
            negatives: vec![
                Vec::with_capacity(examples.len() * self.shape.document_length);
                self.shape.num_negatives
            ],
            targets: vec![1.0; examples.len()],
        };
        for example in examples {
            batch.query.extend_from_slice(&example.query);
            batch.positive.extend_from_slice(&example.positive);
            for (column, negative) in batch.negatives.iter_mut().zip(&example.negatives) {
                column.extend_from_slice(negative);
            }
        }

        self.cursor = end;
        if self.cursor == self.examples.len() {
            self.cursor = 0;
            self.pass += 1;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn shape() -> InputShape {
        InputShape {
            query_length: 3,
            document_length: 4,
            num_negatives: 2,
        }
    }

    fn example(i: u32) -> Example {
        Example {
            query: vec![i, i + 1],
            positive: vec![i; 6],
            negatives: vec![vec![i + 10], vec![i + 20, i + 21]],
        }
    }

    #[test]
    fn test_pads_and_truncates() {
        let mut generator =
            InMemoryGenerator::new(vec![example(1)], shape(), 4, Mode::Training, 1).unwrap();
        let batch = generator.next_batch().unwrap();

        assert_eq!(batch.query, vec![1, 2, 0]);
        assert_eq!(batch.positive, vec![1, 1, 1, 1]);
        assert_eq!(batch.negatives[0], vec![11, 0, 0, 0]);
        assert_eq!(batch.negatives[1], vec![21, 22, 0, 0]);
        assert_eq!(batch.targets, vec![1.0]);
        batch.validate(&shape()).unwrap();
    }

    #[test]
    fn test_cycles_then_exhausts() {
        let examples = (0..5).map(example).collect();
        let mut generator =
            InMemoryGenerator::new(examples, shape(), 2, Mode::Validation, 2).unwrap();

        let sizes: Vec<usize> = (0..6).map(|_| generator.next_batch().unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1, 2, 2, 1]);

        let err = generator.next_batch().unwrap_err();
        assert_eq!(err.stage(), "batch");
        assert!(err.to_string().contains("validation"));
    }

    #[test]
    fn test_rejects_wrong_negative_count() {
        let mut bad = example(0);
        bad.negatives.pop();
        let err = InMemoryGenerator::new(vec![example(1), bad], shape(), 2, Mode::Training, 1)
            .unwrap_err();
        assert!(err.to_string().contains("example 2 has 1 negative documents"));
    }

    #[test]
    fn test_rejects_empty_configuration() {
        assert!(InMemoryGenerator::new(vec![], shape(), 2, Mode::Training, 1).is_err());
        assert!(InMemoryGenerator::new(vec![example(0)], shape(), 0, Mode::Training, 1).is_err());
        assert!(InMemoryGenerator::new(vec![example(0)], shape(), 2, Mode::Training, 0).is_err());
    }

    #[test]
    fn test_from_jsonl() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            r#"{{"query": [1, 2, 3], "positive": [4, 5, 6, 7], "negatives": [[8], [9]]}}"#
        )?;
        writeln!(file)?;
        writeln!(
            file,
            r#"{{"query": [3], "positive": [2], "negatives": [[1], [0]]}}"#
        )?;

        let mut generator =
            InMemoryGenerator::from_jsonl(file.path(), shape(), 8, Mode::Training, 1)?;
        assert_eq!(generator.len(), 2);

        let batch = generator.next_batch()?;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.query, vec![1, 2, 3, 3, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_from_jsonl_reports_line() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, r#"{{"query": [1], "positive": [1], "negatives": [[1], [1]]}}"#)?;
        writeln!(file, "not json")?;

        let err = read_examples(file.path()).unwrap_err();
        assert!(err.to_string().contains(":2:"));
        Ok(())
    }
}
