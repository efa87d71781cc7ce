use std::fs::File;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::tempdir;

use crate::candidate_set::reader::CandidateSetReader;
use crate::candidate_set::CandidateSet;
use crate::errors::{RerankerError, Result};
use crate::loss::LossFunction;
use crate::model::{
    EndOfEpochModelWriter, EpochStats, HookAction, Model, ModelConfig, ModelState, StopReason,
    UpdateRule,
};
use crate::scorer::{CandidateSetScorer, RandomPairScorer};
use crate::symbols::{LocalSymbolTable, SharedSymbolTable, Symbols, read_symbols};
use crate::test_utils::candidate_set;

const TOY: &str = include_str!("./resources/toy.txt");
const TRAIN: &str = include_str!("./resources/train.txt");
const DEV: &str = include_str!("./resources/dev.txt");

fn read(text: &str) -> Vec<CandidateSet> {
    CandidateSetReader::new().read(text.as_bytes()).unwrap()
}

fn weight_of(model: &Model, name: &str) -> f64 {
    let index = model.symbols().get_index(name).unwrap();
    model.weights().weight(&index)
}

/// 2つの候補集合で正解が入れ替わっており、重みが毎エポック0に戻るコーパス
fn opposing_corpus() -> Vec<CandidateSet> {
    vec![
        candidate_set("a", Some(0), &[(0.0, "x"), (1.0, "y")]),
        candidate_set("b", Some(0), &[(0.0, "y"), (1.0, "x")]),
    ]
}

fn wer_model(name: &str) -> Model {
    let mut model = Model::new(name, UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().loss_function(LossFunction::WordErrorRate))
        .unwrap();
    model
}

#[test]
fn test_toy_corpus() {
    let mut corpus = read(TOY);
    let mut model = Model::new("toy", UpdateRule::Perceptron);
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Converged, report.stop_reason);
    assert_eq!(2, report.epochs_run);
    assert_eq!(0, report.final_violations);
    assert_eq!(1, report.epoch_stats[0].num_violations);
    assert_eq!(ModelState::Converged, model.state());
    assert_eq!(2.0, weight_of(&model, "x"));

    model.score_candidates(&mut corpus[0]).unwrap();
    assert_eq!(2.0, corpus[0][0].score());
    assert_eq!(-2.0, corpus[0][1].score());
    assert_eq!(Some(0), corpus[0].best_scoring_index());
}

#[test]
fn test_zero_max_epochs() {
    let mut corpus = read(TOY);
    let mut model = Model::new("toy", UpdateRule::Perceptron);
    model.configure(ModelConfig::new().max_epochs(0)).unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(0, report.epochs_run);
    assert_eq!(StopReason::MaxEpochsReached, report.stop_reason);
    assert!(report.epoch_stats.is_empty());
    assert!(model.weights().is_empty());
    assert_eq!(ModelState::Exhausted, model.state());
}

#[test]
fn test_no_usable_data() {
    let mut corpus = vec![
        CandidateSet::new("empty"),
        candidate_set("bad-gold", Some(5), &[(0.0, "x"), (1.0, "y")]),
    ];
    let mut model = Model::new("none", UpdateRule::Perceptron);
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::NoUsableData, report.stop_reason);
    assert_eq!(0, report.epochs_run);
    assert_eq!(2, report.skipped_instances);
    assert!(model.weights().is_empty());

    let mut model = Model::new("none", UpdateRule::Perceptron);
    let report = model.train(&mut []).unwrap();
    assert_eq!(StopReason::NoUsableData, report.stop_reason);
}

#[test]
fn test_zero_max_epochs_without_usable_data() {
    let mut model = Model::new("none", UpdateRule::Perceptron);
    model.configure(ModelConfig::new().max_epochs(0)).unwrap();
    let report = model.train(&mut []).unwrap();

    assert_eq!(StopReason::MaxEpochsReached, report.stop_reason);
    assert_eq!(0, report.epochs_run);
}

#[test]
fn test_restored_symbol_table_with_holes() {
    let mut table = LocalSymbolTable::new();
    read_symbols(&mut table, "g\t0\nd\t2\n".as_bytes()).unwrap();

    let mut corpus = vec![candidate_set("s", Some(1), &[(1.0, "d"), (0.0, "g")])];
    let mut model = Model::new("restored", UpdateRule::Perceptron);
    model.set_symbols(table).unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(0, report.skipped_instances);
    assert_eq!(StopReason::Converged, report.stop_reason);
    assert_eq!(2, report.epochs_run);
    assert_eq!(Some(2), model.symbols().get_index("d"));
    assert_eq!(1.0, weight_of(&model, "g"));
    assert_eq!(-1.0, weight_of(&model, "d"));
}

#[test]
fn test_skipped_instances_are_counted() {
    let mut corpus = read(TOY);
    corpus.push(CandidateSet::new("empty"));
    let mut model = Model::new("toy", UpdateRule::Perceptron);
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Converged, report.stop_reason);
    assert_eq!(1, report.skipped_instances);
    assert_eq!(1, report.epoch_stats[0].num_skipped);
    assert_eq!(2, report.epoch_stats[0].num_instances);
    assert_eq!(2.0, weight_of(&model, "x"));
}

#[test]
fn test_missing_gold_comparator() {
    let mut corpus = vec![candidate_set("no-gold", None, &[(0.0, "x"), (1.0, "y")])];
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().gold_comparator(None))
        .unwrap();

    let err = model.train(&mut corpus).unwrap_err();
    assert!(err.is_configuration());
    assert!(model.weights().is_empty());
    assert_eq!(0, model.symbols().size());
}

#[test]
fn test_missing_score_comparator() {
    let mut corpus = read(TOY);
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().score_comparator(None))
        .unwrap();
    assert!(model.train(&mut corpus).unwrap_err().is_configuration());
}

#[test]
fn test_min_epochs_exceeds_max_epochs() {
    let mut corpus = read(TOY);
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().min_epochs(3).max_epochs(2))
        .unwrap();
    assert!(model.train(&mut corpus).unwrap_err().is_configuration());
}

#[test]
fn test_foreign_symbol_table() {
    let mut corpus = read(TOY);
    let mut other = LocalSymbolTable::new();
    corpus[1].compile_features(&mut other, true).unwrap();

    let mut model = Model::new("m", UpdateRule::Perceptron);
    assert!(model.train(&mut corpus).unwrap_err().is_configuration());
    assert!(model.weights().is_empty());
    assert!(!corpus[0][0].is_compiled());
}

#[test]
fn test_configure_after_training() {
    let mut corpus = read(TOY);
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model.train(&mut corpus).unwrap();

    assert!(model.configure(ModelConfig::new()).unwrap_err().is_configuration());
    assert!(model
        .set_symbols(LocalSymbolTable::new())
        .unwrap_err()
        .is_configuration());

    model.prepare_for_inference(false).unwrap();
    assert_eq!(ModelState::InferenceReady, model.state());
}

#[test]
fn test_prepare_for_inference_before_training() {
    let mut model = Model::new("m", UpdateRule::Perceptron);
    assert!(matches!(
        model.prepare_for_inference(true),
        Err(RerankerError::InvalidState(_))
    ));
}

#[test]
fn test_no_update_without_violation() {
    let mut corpus = read(TOY);
    let mut model = Model::new("toy", UpdateRule::Perceptron);
    model.train(&mut corpus).unwrap();
    let before = model.export_weights();

    let report = model.train(&mut corpus).unwrap();
    assert_eq!(1, report.epochs_run);
    assert_eq!(0, report.final_violations);
    assert_eq!(before, *model.weights());
}

#[test]
fn test_best_scoring_candidate_has_maximal_score() {
    let mut corpus = read(TRAIN);
    let mut model = wer_model("asr");
    model.train(&mut corpus).unwrap();

    for set in &mut corpus {
        model.score_candidates(set).unwrap();
        let best = set.best_scoring_index().unwrap();
        assert!(set.iter().all(|c| c.score() <= set[best].score()));
        assert_eq!(0.0, set[best].loss());
    }
}

#[test]
fn test_gold_chosen_by_loss() {
    let mut corpus = read(TRAIN);
    let mut model = wer_model("asr");
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Converged, report.stop_reason);
    assert_eq!(2, report.epochs_run);
    assert_eq!(3, report.epoch_stats[0].num_violations);
    assert!((report.epoch_stats[0].average_loss - 0.25).abs() < 1e-9);
    assert_eq!(0.0, report.epoch_stats[1].average_loss);
    assert_eq!(Some(1), report.best_epoch);
    for name in ["sub", "del", "ins"] {
        assert_eq!(-1.0, weight_of(&model, name));
    }
}

#[test]
fn test_train_with_dev() {
    let mut corpus = read(TRAIN);
    let mut dev = read(DEV);
    let mut model = wer_model("asr");
    let report = model.train_with_dev(&mut corpus, &mut dev).unwrap();

    assert_eq!(StopReason::Converged, report.stop_reason);
    assert!((report.epoch_stats[0].average_loss - 0.25).abs() < 1e-9);
    assert_eq!(0.0, report.epoch_stats[0].objective);
    assert_eq!(Some(0), report.best_epoch);
    assert!(dev[0][1].score() > dev[0][0].score());
}

#[test]
fn test_declined() {
    let mut corpus = opposing_corpus();
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().max_epochs_in_decline(2))
        .unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Declined, report.stop_reason);
    assert_eq!(3, report.epochs_run);
    assert_eq!(2, report.final_violations);
    assert_eq!(Some(0), report.best_epoch);
    assert_eq!(ModelState::Exhausted, model.state());
}

#[test]
fn test_min_epochs_defers_stop() {
    let mut corpus = opposing_corpus();
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(
            ModelConfig::new()
                .min_epochs(5)
                .max_epochs(10)
                .max_epochs_in_decline(2),
        )
        .unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Declined, report.stop_reason);
    assert_eq!(5, report.epochs_run);
}

#[test]
fn test_max_epochs_reached() {
    let mut corpus = opposing_corpus();
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().max_epochs(4).max_epochs_in_decline(0))
        .unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::MaxEpochsReached, report.stop_reason);
    assert_eq!(4, report.epochs_run);
    assert_eq!(4, report.epoch_stats.len());
}

#[test]
fn test_hook_can_stop_training() {
    let seen = Arc::new(Mutex::new(vec![]));
    let seen_in_hook = Arc::clone(&seen);

    let mut corpus = opposing_corpus();
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().max_epochs(10).max_epochs_in_decline(0))
        .unwrap();
    model
        .set_end_of_epoch_hook(move |_: &Model, stats: &EpochStats| -> Result<HookAction> {
            seen_in_hook.lock().push(stats.epoch);
            Ok(if stats.epoch == 1 {
                HookAction::Stop
            } else {
                HookAction::Continue
            })
        })
        .unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Cancelled, report.stop_reason);
    assert_eq!(2, report.epochs_run);
    assert_eq!(vec![0, 1], *seen.lock());
}

#[test]
fn test_hook_error_aborts_training() {
    let mut corpus = opposing_corpus();
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .set_end_of_epoch_hook(|_: &Model, _: &EpochStats| -> Result<HookAction> {
            Err(RerankerError::invalid_state("writing a checkpoint", "disk full"))
        })
        .unwrap();

    assert!(model.train(&mut corpus).is_err());
    assert_eq!(ModelState::Exhausted, model.state());
}

#[test]
fn test_end_of_epoch_model_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.bin");

    let mut corpus = read(TRAIN);
    let mut model = wer_model("asr");
    model
        .set_end_of_epoch_hook(EndOfEpochModelWriter::new(&path))
        .unwrap();
    model.train(&mut corpus).unwrap();

    let written = Model::read_model(File::open(&path).unwrap()).unwrap();
    assert_eq!(Some(1), written.best_epoch());
    assert_eq!(model.weights(), written.weights());
}

#[test]
fn test_weighted_perceptron() {
    let mut corpus = vec![candidate_set("s", Some(0), &[(0.0, "a"), (0.25, "b")])];
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().max_epochs(1).use_weighted_loss(true))
        .unwrap();
    model.train(&mut corpus).unwrap();

    assert_eq!(1.25, weight_of(&model, "a"));
    assert_eq!(-1.25, weight_of(&model, "b"));
}

#[test]
fn test_weighted_perceptron_equal_losses() {
    let mut corpus = vec![candidate_set("s", Some(1), &[(0.0, "x"), (0.0, "y")])];
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().max_epochs(5).use_weighted_loss(true))
        .unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Converged, report.stop_reason);
    assert_eq!(2, report.epochs_run);
    assert_eq!(1.0, weight_of(&model, "y"));
    assert_eq!(-1.0, weight_of(&model, "x"));
}

#[test]
fn test_mira_reaches_margin() {
    let mut corpus = vec![candidate_set("s", Some(0), &[(0.0, "a"), (1.0, "b")])];
    let mut model = Model::new("m", UpdateRule::Mira);
    model.configure(ModelConfig::new().max_epochs(1)).unwrap();
    model.train(&mut corpus).unwrap();

    assert_eq!(0.5, weight_of(&model, "a"));
    assert_eq!(-0.5, weight_of(&model, "b"));
}

#[test]
fn test_mira_margin_follows_loss() {
    let mut corpus = vec![candidate_set("s", Some(0), &[(0.0, "a"), (0.25, "b")])];
    let mut model = Model::new("m", UpdateRule::Mira);
    model.configure(ModelConfig::new().max_epochs(1)).unwrap();
    model.train(&mut corpus).unwrap();

    assert_eq!(0.125, weight_of(&model, "a"));
    assert_eq!(-0.125, weight_of(&model, "b"));
}

#[test]
fn test_mira_resolves_ties_between_equal_losses() {
    let mut corpus = vec![candidate_set("s", Some(1), &[(0.0, "x"), (0.0, "y")])];
    let mut model = Model::new("m", UpdateRule::Mira);
    model.configure(ModelConfig::new().max_epochs(5)).unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Converged, report.stop_reason);
    assert_eq!(2, report.epochs_run);
    assert!((weight_of(&model, "y") - 5e-4).abs() < 1e-12);
    assert!((weight_of(&model, "x") + 5e-4).abs() < 1e-12);
}

#[test]
fn test_mira_update_is_clipped() {
    let mut corpus = vec![candidate_set("s", Some(0), &[(0.0, "a=3"), (1.0, "b=4")])];
    let mut model = Model::new("m", UpdateRule::Mira);
    model
        .configure(ModelConfig::new().max_epochs(1).mira_clip(0.1))
        .unwrap();
    model.train(&mut corpus).unwrap();

    let norm = model.weights().l2_norm_squared().sqrt();
    assert!(norm <= 0.1 + 1e-12);
    assert!(norm > 0.1 - 1e-12);
}

#[test]
fn test_average_weights() {
    let mut corpus = opposing_corpus();
    let mut model = Model::new("m", UpdateRule::Perceptron);
    model
        .configure(ModelConfig::new().max_epochs(1).average_weights(true))
        .unwrap();
    model.train(&mut corpus).unwrap();

    assert!(model.raw_weights().iter().all(|(_, w)| w == 0.0));
    assert_eq!(0.5, weight_of(&model, "x"));
    assert_eq!(-0.5, weight_of(&model, "y"));
}

#[test]
fn test_random_pair_scorer() {
    let mut corpus = read(TOY);
    let mut model = Model::new("toy", UpdateRule::Perceptron);
    model
        .configure(
            ModelConfig::new()
                .scorer(CandidateSetScorer::RandomPair(RandomPairScorer::new(1, 7))),
        )
        .unwrap();
    let report = model.train(&mut corpus).unwrap();

    assert_eq!(StopReason::Converged, report.stop_reason);
    assert_eq!(2.0, weight_of(&model, "x"));
}

#[test]
fn test_shared_symbol_table() {
    let shared = SharedSymbolTable::new();
    let mut corpus = read(TOY);

    let mut first = Model::new("first", UpdateRule::Perceptron);
    first.set_symbols(shared.clone()).unwrap();
    first.train(&mut corpus).unwrap();

    let mut second = Model::new("second", UpdateRule::Mira);
    second.set_symbols(shared.clone()).unwrap();
    second.train(&mut corpus).unwrap();
    assert_eq!(1, shared.size());

    let standalone = Model::new("standalone", UpdateRule::Perceptron);
    assert!(standalone
        .score_candidates(&mut corpus[0])
        .unwrap_err()
        .is_configuration());
}
