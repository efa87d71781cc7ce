//! リランキングモデルと学習ループのモジュール。
//!
//! [`Model`] は重みベクトルとシンボル表を所有し、候補集合のコーパスに対して
//! オンライン学習（パーセプトロンまたはMIRA）を行います。
//! 更新則は [`UpdateRule`] で切り替え、エポック処理や収束判定は共通です。
//!
//! # 状態遷移
//!
//! ```text
//! Uninitialized → Configured → Training { epoch } → Converged | Exhausted → InferenceReady
//! ```
//!
//! 設定の変更は学習開始前にだけ行えます。
//! [`Model::score_candidates`] は重みを変更しないため、どの状態からでも呼び出せます。
//!
//! # 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use reranker::candidate_set::reader::CandidateSetReader;
//! use reranker::model::{Model, ModelConfig, StopReason, UpdateRule};
//!
//! let text = "\
//! @key\tutt-1
//! @gold\t0
//! 0\t0\tthe cat\tgood
//! 1\t0\tthe cap\tbad
//! EOS
//! ";
//! let mut corpus = CandidateSetReader::new().read(text.as_bytes())?;
//!
//! let mut model = Model::new("example", UpdateRule::Perceptron);
//! model.configure(ModelConfig::new().max_epochs(5))?;
//! let report = model.train(&mut corpus)?;
//! assert_eq!(StopReason::Converged, report.stop_reason);
//!
//! model.score_candidates(&mut corpus[0])?;
//! assert_eq!(Some(0), corpus[0].best_scoring_index());
//! # Ok(())
//! # }
//! ```

mod config;
mod hook;
mod io;
mod time;
mod training_vectors;
mod update;

use std::time::{Duration, Instant};

use crate::candidate::{Candidate, Comparator};
use crate::candidate_set::CandidateSet;
use crate::errors::{RerankerError, Result};
use crate::feature_vector::FeatureVector;
use crate::kernel::KernelFunction;
use crate::symbols::{SymbolTable, Symbols};

pub use crate::model::config::ModelConfig;
pub use crate::model::hook::{EndOfEpochHook, EndOfEpochModelWriter, HookAction};
pub use crate::model::time::Time;
pub use crate::model::training_vectors::TrainingVectorSet;
pub use crate::model::update::{StepSize, UpdateRule};
use crate::model::update::UpdateParams;

/// モデルの状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    /// 作成直後
    Uninitialized,
    /// 設定済み
    Configured,
    /// 学習中
    Training {
        /// 実行中のエポック（0始まり）
        epoch: usize,
    },
    /// 違反がなくなって学習が終了した
    Converged,
    /// 収束せずに学習が終了した
    Exhausted,
    /// 推論に使用できる
    InferenceReady,
}

/// 学習が終了した理由。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// 違反のないエポックがあった
    Converged,
    /// 最大エポック数に達した
    MaxEpochsReached,
    /// 目的関数が改善しないエポックが続いた
    Declined,
    /// 使用できる訓練データがなかった
    NoUsableData,
    /// エポック終了時のフックが停止を要求した
    Cancelled,
}

/// 1エポックの統計。
#[derive(Clone, Debug, PartialEq)]
pub struct EpochStats {
    /// エポック番号（0始まり）
    pub epoch: usize,
    /// 違反の数
    pub num_violations: usize,
    /// スキップされたインスタンスの数
    pub num_skipped: usize,
    /// 処理されたインスタンスの数
    pub num_instances: usize,
    /// 訓練データ上の1-best候補の平均損失
    pub average_loss: f64,
    /// 打ち切り判定に使う目的関数の値（小さいほど良い）
    pub objective: f64,
    /// エポックの所要時間
    pub elapsed: Duration,
}

/// 学習の結果。
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingReport {
    /// 実行したエポック数
    pub epochs_run: usize,
    /// 最後のエポックの違反数
    pub final_violations: usize,
    /// 終了理由
    pub stop_reason: StopReason,
    /// スキップされたインスタンスの数
    pub skipped_instances: usize,
    /// 目的関数が最良だったエポック
    pub best_epoch: Option<usize>,
    /// エポックごとの統計
    pub epoch_stats: Vec<EpochStats>,
}

/// リランキングモデル。
pub struct Model {
    name: String,
    update_rule: UpdateRule,
    config: ModelConfig,
    state: ModelState,
    symbols: SymbolTable,
    vectors: TrainingVectorSet,
    time: Time,
    best_epoch: Option<usize>,
    best_objective: f64,
    best_weights: Option<FeatureVector>,
    num_epochs_in_decline: usize,
    hook: Option<Box<dyn EndOfEpochHook>>,
}

impl Model {
    /// 新しいモデルを作成します。
    ///
    /// # 引数
    ///
    /// * `name` - モデルの名前
    /// * `update_rule` - 違反時の重みの更新則
    pub fn new<S>(name: S, update_rule: UpdateRule) -> Self
    where
        S: Into<String>,
    {
        Self {
            name: name.into(),
            update_rule,
            config: ModelConfig::default(),
            state: ModelState::Uninitialized,
            symbols: SymbolTable::default(),
            vectors: TrainingVectorSet::new(),
            time: Time::new(),
            best_epoch: None,
            best_objective: f64::INFINITY,
            best_weights: None,
            num_epochs_in_decline: 0,
            hook: None,
        }
    }

    /// モデルの名前
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 更新則
    pub fn update_rule(&self) -> UpdateRule {
        self.update_rule
    }

    /// 現在の状態
    pub fn state(&self) -> ModelState {
        self.state
    }

    /// 学習設定
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// シンボル表
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// 学習時刻
    pub fn time(&self) -> &Time {
        &self.time
    }

    /// 目的関数が最良だったエポック
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// 最良のエポック終了時点の重み
    pub fn best_weights(&self) -> Option<&FeatureVector> {
        self.best_weights.as_ref()
    }

    /// 推論に使用する重み
    ///
    /// 平均化が有効であれば平均重み、そうでなければ生の重みです。
    pub fn weights(&self) -> &FeatureVector {
        self.vectors.get(!self.config.average_weights)
    }

    /// 学習で更新される生の重み
    pub fn raw_weights(&self) -> &FeatureVector {
        self.vectors.weights()
    }

    /// 推論に使用する重みのコピーを返します。
    pub fn export_weights(&self) -> FeatureVector {
        self.weights().clone()
    }

    fn ensure_not_started(&self, what: &str) -> Result<()> {
        match self.state {
            ModelState::Training { .. } | ModelState::Converged | ModelState::Exhausted => Err(
                RerankerError::configuration(format!("cannot {what} after training has started")),
            ),
            _ => Ok(()),
        }
    }

    /// 学習設定を適用します。
    ///
    /// # エラー
    ///
    /// 学習開始後に呼び出された場合、[`RerankerError`] が返されます。
    pub fn configure(&mut self, config: ModelConfig) -> Result<()> {
        self.ensure_not_started("configure the model")?;
        self.config = config;
        if self.state == ModelState::Uninitialized {
            self.state = ModelState::Configured;
        }
        Ok(())
    }

    /// シンボル表を差し替えます。
    ///
    /// # エラー
    ///
    /// 学習開始後に呼び出された場合、[`RerankerError`] が返されます。
    pub fn set_symbols<T>(&mut self, symbols: T) -> Result<()>
    where
        T: Into<SymbolTable>,
    {
        self.ensure_not_started("replace the symbol table")?;
        self.symbols = symbols.into();
        Ok(())
    }

    /// カーネル関数を設定します。
    ///
    /// # エラー
    ///
    /// 学習開始後に呼び出された場合、[`RerankerError`] が返されます。
    pub fn set_kernel(&mut self, kernel: KernelFunction) -> Result<()> {
        self.ensure_not_started("set the kernel")?;
        self.config.kernel = kernel;
        Ok(())
    }

    /// エポック終了時のフックを設定します。
    ///
    /// # エラー
    ///
    /// 学習開始後に呼び出された場合、[`RerankerError`] が返されます。
    pub fn set_end_of_epoch_hook<H>(&mut self, hook: H) -> Result<()>
    where
        H: EndOfEpochHook + 'static,
    {
        self.ensure_not_started("set the end-of-epoch hook")?;
        self.hook = Some(Box::new(hook));
        Ok(())
    }

    /// 候補集合の素性をモデルのシンボル表でコンパイルします。
    ///
    /// # エラー
    ///
    /// 別のシンボル表でコンパイル済みの候補集合がある場合、[`RerankerError`] が返されます。
    pub fn compile_candidate_sets(&mut self, sets: &mut [CandidateSet]) -> Result<()> {
        for set in sets {
            set.compile_features(&mut self.symbols, true)?;
        }
        Ok(())
    }

    /// コーパスでモデルを学習します。
    ///
    /// 目的関数には訓練データ上の1-best候補の平均損失を使用します。
    ///
    /// # 引数
    ///
    /// * `corpus` - 訓練データ。未コンパイルの候補集合はモデルのシンボル表でコンパイルされます。
    ///
    /// # 戻り値
    ///
    /// 学習の結果
    ///
    /// # エラー
    ///
    /// 設定が不正な場合、重みを変更する前に [`RerankerError`] が返されます。
    /// 不正な候補集合はエラーにならず、スキップされて件数が報告されます。
    pub fn train(&mut self, corpus: &mut [CandidateSet]) -> Result<TrainingReport> {
        self.train_impl(corpus, None)
    }

    /// 開発データで打ち切りを判定しながらモデルを学習します。
    ///
    /// 目的関数には開発データ上の1-best候補の平均損失を使用します。
    ///
    /// # エラー
    ///
    /// [`Model::train`] と同じです。
    pub fn train_with_dev(
        &mut self,
        corpus: &mut [CandidateSet],
        dev: &mut [CandidateSet],
    ) -> Result<TrainingReport> {
        self.train_impl(corpus, Some(dev))
    }

    fn check_configuration(
        &self,
        corpus: &[CandidateSet],
        dev: Option<&[CandidateSet]>,
    ) -> Result<(Option<Comparator>, Comparator)> {
        let config = &self.config;
        if config.min_epochs > config.max_epochs {
            return Err(RerankerError::configuration(format!(
                "min_epochs ({}) must not exceed max_epochs ({})",
                config.min_epochs, config.max_epochs
            )));
        }
        let Some(score_comparator) = config.score_comparator.clone() else {
            return Err(RerankerError::configuration(
                "a score comparator is required",
            ));
        };
        let table_id = self.symbols.table_id();
        for set in corpus.iter().chain(dev.unwrap_or_default()) {
            if config.gold_comparator.is_none() && set.gold_index().is_none() {
                return Err(RerankerError::configuration(format!(
                    "candidate set '{}' has no gold index and no gold comparator is configured",
                    set.training_key()
                )));
            }
            if set.table_id().is_some_and(|id| id != table_id) {
                return Err(RerankerError::configuration(format!(
                    "candidate set '{}' was compiled against a different symbol table",
                    set.training_key()
                )));
            }
        }
        Ok((config.gold_comparator.clone(), score_comparator))
    }

    fn prepare(&mut self, sets: &mut [CandidateSet]) -> Result<()> {
        for set in sets {
            set.compile_features(&mut self.symbols, true)?;
            if let Some(loss_function) = &self.config.loss_function {
                set.compute_losses(loss_function, true);
            }
        }
        Ok(())
    }

    fn train_impl(
        &mut self,
        corpus: &mut [CandidateSet],
        mut dev: Option<&mut [CandidateSet]>,
    ) -> Result<TrainingReport> {
        let (gold_comparator, score_comparator) =
            self.check_configuration(corpus, dev.as_deref())?;
        if self.state == ModelState::Uninitialized {
            self.state = ModelState::Configured;
        }

        self.prepare(corpus)?;
        if let Some(dev) = dev.as_deref_mut() {
            self.prepare(dev)?;
        }

        let usable: Vec<bool> = corpus
            .iter()
            .map(|set| match set.validate(&self.symbols) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Skipping instance: {e}");
                    false
                }
            })
            .collect();
        let skipped_instances = usable.iter().filter(|&&u| !u).count();

        self.best_epoch = None;
        self.best_objective = f64::INFINITY;
        self.best_weights = None;
        self.num_epochs_in_decline = 0;

        let mut report = TrainingReport {
            epochs_run: 0,
            final_violations: 0,
            stop_reason: StopReason::MaxEpochsReached,
            skipped_instances,
            best_epoch: None,
            epoch_stats: vec![],
        };

        if self.config.max_epochs == 0 {
            self.state = ModelState::Exhausted;
            return Ok(report);
        }
        if skipped_instances == corpus.len() {
            log::error!("No usable training data in {} candidate sets", corpus.len());
            report.stop_reason = StopReason::NoUsableData;
            self.state = ModelState::Exhausted;
            return Ok(report);
        }

        log::info!(
            "Training model '{}' ({:?}) on {} candidate sets ({} skipped)",
            self.name,
            self.update_rule,
            corpus.len(),
            skipped_instances
        );

        loop {
            let epoch = report.epochs_run;
            self.state = ModelState::Training { epoch };
            let stats = self.run_epoch(
                corpus,
                &usable,
                dev.as_deref_mut(),
                gold_comparator.as_ref(),
                &score_comparator,
                epoch,
            );
            log::info!(
                "Epoch {}: {} violations in {} instances ({} skipped), loss {:.6}, objective {:.6} ({:.2?})",
                stats.epoch,
                stats.num_violations,
                stats.num_instances,
                stats.num_skipped,
                stats.average_loss,
                stats.objective,
                stats.elapsed
            );

            let action = match self.invoke_hook(&stats) {
                Ok(action) => action,
                Err(e) => {
                    self.state = ModelState::Exhausted;
                    return Err(e);
                }
            };

            report.epochs_run += 1;
            report.final_violations = stats.num_violations;
            report.best_epoch = self.best_epoch;
            let num_violations = stats.num_violations;
            report.epoch_stats.push(stats);

            let epochs_run = report.epochs_run;
            let min_reached = epochs_run >= self.config.min_epochs;
            let stop_reason = if action == HookAction::Stop {
                Some(StopReason::Cancelled)
            } else if num_violations == 0 && min_reached {
                Some(StopReason::Converged)
            } else if self.config.max_epochs_in_decline != 0
                && self.num_epochs_in_decline >= self.config.max_epochs_in_decline
                && min_reached
            {
                Some(StopReason::Declined)
            } else if epochs_run >= self.config.max_epochs {
                Some(StopReason::MaxEpochsReached)
            } else {
                None
            };

            if let Some(stop_reason) = stop_reason {
                report.stop_reason = stop_reason;
                self.state = if stop_reason == StopReason::Converged {
                    ModelState::Converged
                } else {
                    ModelState::Exhausted
                };
                log::info!("Training stopped after {epochs_run} epochs: {stop_reason:?}");
                return Ok(report);
            }
        }
    }

    fn run_epoch(
        &mut self,
        corpus: &mut [CandidateSet],
        usable: &[bool],
        dev: Option<&mut [CandidateSet]>,
        gold_comparator: Option<&Comparator>,
        score_comparator: &Comparator,
        epoch: usize,
    ) -> EpochStats {
        let start = Instant::now();
        self.time.new_epoch();
        let params = UpdateParams {
            step_size: self.config.step_size.at(epoch),
            use_weighted_loss: self.config.use_weighted_loss,
            mira_clip: self.config.mira_clip,
        };

        let mut num_violations = 0;
        let mut num_instances = 0;
        let mut loss_sum = 0.0;
        for (set, _) in corpus.iter_mut().zip(usable).filter(|(_, usable)| **usable) {
            self.config
                .scorer
                .score(set, self.vectors.weights(), &self.config.kernel);

            let Some(gold) = set
                .gold_index()
                .or_else(|| gold_comparator.and_then(|c| c.best_index(set)))
            else {
                continue;
            };
            if !set[gold].score().is_finite() {
                // The gold candidate may have been left out by a sampling scorer.
                let score = self
                    .config
                    .kernel
                    .score(set[gold].features(), self.vectors.weights());
                if let Some(candidate) = set.get_candidate_mut(gold) {
                    candidate.set_score(score);
                }
            }

            if let Some(best) = score_comparator.best_index(set) {
                loss_sum += set[best].loss();
            }
            num_instances += 1;

            if let Some(competitor) = score_comparator.best_index_excluding(set, gold) {
                let gold = &set[gold];
                let competitor = &set[competitor];
                if competitor.score().is_finite() && competitor.score() >= gold.score() {
                    num_violations += 1;
                    let mut delta = gold.features().clone();
                    delta.add_scaled(competitor.features(), -1.0);
                    let scale =
                        self.update_rule
                            .scale(gold, competitor, delta.l2_norm_squared(), &params);
                    if scale != 0.0 {
                        self.vectors.update(&self.time, &delta, scale);
                    }
                    log::debug!(
                        "Violation in '{}': gold {} ({}) vs {} ({}), scale {scale}",
                        set.training_key(),
                        gold.index(),
                        gold.score(),
                        competitor.index(),
                        competitor.score()
                    );
                }
            }
            self.time.tick();
        }

        self.vectors.update_all_averages(&self.time);

        let average_loss = if num_instances == 0 {
            0.0
        } else {
            loss_sum / num_instances as f64
        };
        let objective = match dev {
            Some(dev) => self.evaluate(dev, score_comparator).unwrap_or_else(|| {
                log::warn!("No usable development data; using the training loss");
                average_loss
            }),
            None => average_loss,
        };
        if objective < self.best_objective {
            self.best_objective = objective;
            self.best_epoch = Some(epoch);
            self.best_weights = Some(self.weights().clone());
            self.num_epochs_in_decline = 0;
        } else {
            self.num_epochs_in_decline += 1;
        }

        EpochStats {
            epoch,
            num_violations,
            num_skipped: usable.len() - num_instances,
            num_instances,
            average_loss,
            objective,
            elapsed: start.elapsed(),
        }
    }

    /// 候補集合上の1-best候補の平均損失を計算します。使用できる候補集合がなければ `None` です。
    fn evaluate(&self, sets: &mut [CandidateSet], score_comparator: &Comparator) -> Option<f64> {
        let mut loss_sum = 0.0;
        let mut num_sets = 0;
        for set in sets {
            if set.validate(&self.symbols).is_err() {
                continue;
            }
            set.score_all(self.weights(), &self.config.kernel);
            if let Some(best) = score_comparator.best_index(set) {
                loss_sum += set[best].loss();
                num_sets += 1;
            }
        }
        (num_sets != 0).then(|| loss_sum / num_sets as f64)
    }

    fn invoke_hook(&mut self, stats: &EpochStats) -> Result<HookAction> {
        let Some(mut hook) = self.hook.take() else {
            return Ok(HookAction::Continue);
        };
        let action = hook.on_epoch_end(self, stats);
        self.hook = Some(hook);
        action
    }

    /// 学習を終えたモデルを推論用の状態にします。
    ///
    /// # 引数
    ///
    /// * `use_best_weights` - `true` の場合、目的関数が最良だったエポックの重みに戻します。
    ///
    /// # エラー
    ///
    /// 学習が終了していない場合、[`RerankerError`] が返されます。
    pub fn prepare_for_inference(&mut self, use_best_weights: bool) -> Result<()> {
        match self.state {
            ModelState::Converged | ModelState::Exhausted | ModelState::InferenceReady => {}
            state => {
                return Err(RerankerError::invalid_state(
                    "preparing the model for inference",
                    format!("the model has not finished training ({state:?})"),
                ));
            }
        }
        if use_best_weights {
            if let Some(best) = self.best_weights.clone() {
                self.vectors.reset_to(best);
            }
        }
        self.state = ModelState::InferenceReady;
        Ok(())
    }

    /// 候補のスコアを計算します。重みも候補も変更しません。
    ///
    /// 未コンパイルの候補は、記号素性の名前をシンボル表で引いて計算します。
    /// シンボル表にない素性は重みが0として扱われます。
    pub fn score_candidate(&self, candidate: &Candidate) -> f64 {
        let weights = self.weights();
        let mut dot = candidate.features().dot(weights);
        if !candidate.is_compiled() {
            for (name, value) in candidate.symbolic_features().iter() {
                if let Some(index) = self.symbols.get_index(name) {
                    dot += weights.weight(&index) * value;
                }
            }
        }
        self.config.kernel.apply(dot)
    }

    /// 候補集合のすべての候補にスコアを付与し、最高スコアの位置を更新します。
    ///
    /// モデルの重みは変更されません。
    ///
    /// # エラー
    ///
    /// 候補集合が別のシンボル表でコンパイルされている場合や、
    /// 候補集合が不正な場合、[`RerankerError`] が返されます。
    pub fn score_candidates(&self, set: &mut CandidateSet) -> Result<()> {
        if set
            .table_id()
            .is_some_and(|id| id != self.symbols.table_id())
        {
            return Err(RerankerError::configuration(format!(
                "candidate set '{}' was compiled against a different symbol table",
                set.training_key()
            )));
        }
        set.validate(&self.symbols)?;
        let scores: Vec<f64> = set.iter().map(|c| self.score_candidate(c)).collect();
        for (i, score) in scores.into_iter().enumerate() {
            if let Some(candidate) = set.get_candidate_mut(i) {
                candidate.set_score(score);
            }
        }
        set.update_best_scoring_index();
        Ok(())
    }
}
