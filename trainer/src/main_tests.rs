#[cfg(test)]
mod tests {
    use crate::Args;
    use clap::Parser;
    use cnn_dssm_backend_core::DType;

    const REQUIRED: [&str; 11] = [
        "cnn-dssm-trainer",
        "--embeddings",
        "embeddings.safetensors",
        "--train-data",
        "train.jsonl",
        "--validation-data",
        "validation.jsonl",
        "--query-length",
        "10",
        "--document-length",
        "200",
    ];

    #[test]
    fn test_args_default_values() {
        let args = Args::try_parse_from(REQUIRED).unwrap();

        assert_eq!(args.num_negative_examples, 3);
        assert_eq!(args.filter_sizes, vec![3, 4]);
        assert_eq!(args.num_filters, 150);
        assert_eq!(args.hidden_dims, 150);
        assert_eq!(args.input_dropout, 0.25);
        assert_eq!(args.hidden_dropout, 0.5);
        assert_eq!(args.gamma, 10.0);
        assert_eq!(args.batch_size, 128);
        assert_eq!(args.epochs, 15);
        assert_eq!(args.samples_per_epoch, 1050916);
        assert_eq!(args.validation_samples, 262729);
        assert_eq!(args.generator_epochs, 15);
        assert_eq!(args.learning_rate, 0.001);
        assert_eq!(args.seed, 1337);
        assert!(!args.freeze_embeddings);
        assert_eq!(args.dtype, DType::Float32);
        assert_eq!(args.prometheus_port, None);
    }

    #[test]
    fn test_args_run_config() {
        let mut argv = REQUIRED.to_vec();
        argv.extend([
            "--num-negative-examples",
            "5",
            "--filter-sizes",
            "2,3,5",
            "--freeze-embeddings",
            "--dtype",
            "float64",
        ]);
        let config = Args::try_parse_from(argv).unwrap().run_config();

        assert_eq!(config.shape.query_length, 10);
        assert_eq!(config.shape.document_length, 200);
        assert_eq!(config.shape.num_negatives, 5);
        assert_eq!(config.filter_sizes, vec![2, 3, 5]);
        assert_eq!(config.dropout_prob, (0.25, 0.5));
        assert!(config.freeze_embeddings);
        assert_eq!(config.dtype, DType::Float64);
    }

    #[test]
    fn test_args_require_inputs() {
        assert!(Args::try_parse_from(["cnn-dssm-trainer"]).is_err());
        assert!(Args::try_parse_from(&REQUIRED[..REQUIRED.len() - 2]).is_err());
    }

    #[test]
    fn test_args_reject_unknown_dtype() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--dtype", "float16"]);
        assert!(Args::try_parse_from(argv).is_err());
    }
}
