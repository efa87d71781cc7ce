//! モデルと重みの入出力。
//!
//! - モデル全体: rkyvによるバイナリ形式
//! - 重みのみ: `インデックス\t重み` のテキスト形式。同じシンボル表と組み合わせて使用します。

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use rkyv::api::serialize_using;
use rkyv::rancor::Error;
use rkyv::ser::Serializer;
use rkyv::ser::allocator::Arena;
use rkyv::ser::sharing::Share;
use rkyv::ser::writer::IoWriter;
use rkyv::util::{AlignedVec, with_arena};
use rkyv::{Archive, Deserialize, Serialize, from_bytes};

use crate::errors::{RerankerError, Result};
use crate::feature_vector::FeatureVector;
use crate::kernel::KernelFunction;
use crate::model::{Model, ModelConfig, ModelState, StepSize, UpdateRule};
use crate::symbols::{LocalSymbolTable, Symbols};

/// 保存可能なカーネル関数
#[derive(Archive, Serialize, Deserialize)]
pub(crate) enum KernelData {
    DotProduct,
    Polynomial { degree: i32, gamma: f64, coef0: f64 },
}

/// モデルデータ。
///
/// 更新則、学習設定のスカラー値、シンボル表、重みを保持します。
#[derive(Archive, Serialize, Deserialize)]
pub(crate) struct ModelData {
    pub name: String,
    pub update_rule: UpdateRule,
    pub symbols: Vec<(String, u32)>,
    pub weights: Vec<(u32, f64)>,
    pub average_weights: Vec<(u32, f64)>,
    pub best_weights: Option<Vec<(u32, f64)>>,
    pub best_epoch: Option<u64>,

    // `None` for user-defined kernels, which cannot be stored.
    pub kernel: Option<KernelData>,

    pub step_size: StepSize,
    pub use_weighted_loss: bool,
    pub min_epochs: u64,
    pub max_epochs: u64,
    pub max_epochs_in_decline: u64,
    pub mira_clip: f64,
    pub use_average_weights: bool,
}

impl Model {
    fn to_data(&self) -> Result<ModelData> {
        let config = &self.config;
        let kernel = match config.kernel {
            KernelFunction::DotProduct => Some(KernelData::DotProduct),
            KernelFunction::Polynomial {
                degree,
                gamma,
                coef0,
            } => Some(KernelData::Polynomial {
                degree,
                gamma,
                coef0,
            }),
            KernelFunction::Custom(_) => {
                log::warn!("A user-defined kernel cannot be saved; it is replaced by the dot product");
                None
            }
        };
        Ok(ModelData {
            name: self.name.clone(),
            update_rule: self.update_rule,
            symbols: self.symbols.entries(),
            weights: self.vectors.weights().sorted_entries(),
            average_weights: self.vectors.average_weights().sorted_entries(),
            best_weights: self.best_weights.as_ref().map(FeatureVector::sorted_entries),
            best_epoch: self.best_epoch.map(u64::try_from).transpose()?,
            kernel,
            step_size: config.step_size,
            use_weighted_loss: config.use_weighted_loss,
            min_epochs: u64::try_from(config.min_epochs)?,
            max_epochs: u64::try_from(config.max_epochs)?,
            max_epochs_in_decline: u64::try_from(config.max_epochs_in_decline)?,
            mira_clip: config.mira_clip,
            use_average_weights: config.average_weights,
        })
    }

    fn from_data(data: ModelData) -> Result<Self> {
        let mut symbols = LocalSymbolTable::new();
        for (name, index) in &data.symbols {
            symbols.set_index(name, *index)?;
        }
        let kernel = match data.kernel {
            Some(KernelData::Polynomial {
                degree,
                gamma,
                coef0,
            }) => KernelFunction::Polynomial {
                degree,
                gamma,
                coef0,
            },
            Some(KernelData::DotProduct) | None => KernelFunction::DotProduct,
        };
        let mut config = ModelConfig::new()
            .kernel(kernel)
            .use_weighted_loss(data.use_weighted_loss)
            .min_epochs(usize::try_from(data.min_epochs)?)
            .max_epochs(usize::try_from(data.max_epochs)?)
            .max_epochs_in_decline(usize::try_from(data.max_epochs_in_decline)?)
            .average_weights(data.use_average_weights);
        // Stored values were accepted by the setters when the model was trained.
        config.step_size = data.step_size;
        config.mira_clip = data.mira_clip;

        let mut model = Self::new(data.name, data.update_rule);
        model.config = config;
        model.symbols = symbols.into();
        model
            .vectors
            .reset_to(data.weights.into_iter().collect());
        model
            .vectors
            .set_average_weights(data.average_weights.into_iter().collect());
        model.best_weights = data.best_weights.map(|w| w.into_iter().collect());
        model.best_epoch = data.best_epoch.map(usize::try_from).transpose()?;
        model.state = ModelState::InferenceReady;
        Ok(model)
    }

    /// モデルを書き出します。
    ///
    /// # 引数
    ///
    /// * `wtr` - 書き込み先
    ///
    /// # エラー
    ///
    /// シリアライゼーションや書き込みに失敗した場合、[`RerankerError`] が返されます。
    pub fn write_model<W>(&self, wtr: W) -> Result<()>
    where
        W: Write,
    {
        let data = self.to_data()?;
        let mut wtr = BufWriter::new(wtr);
        with_arena(|arena: &mut Arena| {
            let writer = IoWriter::new(&mut wtr);
            let mut serializer = Serializer::new(writer, arena.acquire(), Share::new());
            serialize_using::<_, rkyv::rancor::Error>(&data, &mut serializer)
        })
        .map_err(|e| {
            RerankerError::invalid_state("rkyv serialization failed".to_string(), e.to_string())
        })?;
        wtr.flush()?;

        Ok(())
    }

    /// モデルを読み込みます。
    ///
    /// 読み込まれたモデルは推論可能な状態で、専用のシンボル表を持ちます。
    /// 比較関数と損失関数はデフォルトに戻ります。
    ///
    /// # 引数
    ///
    /// * `rdr` - モデルファイルのリーダー
    ///
    /// # エラー
    ///
    /// デシリアライゼーションに失敗した場合や、シンボル表が壊れている場合、
    /// [`RerankerError`] が返されます。
    pub fn read_model<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut bytes = Vec::new();
        rdr.read_to_end(&mut bytes)?;
        let mut aligned_bytes = AlignedVec::<16>::with_capacity(bytes.len());
        aligned_bytes.extend_from_slice(&bytes);

        let data = from_bytes::<ModelData, Error>(&aligned_bytes).map_err(|e| {
            RerankerError::invalid_state(
                "rkyv deserialization failed. The model file may be corrupted.".to_string(),
                e.to_string(),
            )
        })?;

        Self::from_data(data)
    }

    /// 推論に使用する重みを `インデックス\t重み` の行としてインデックス順に書き出します。
    ///
    /// # エラー
    ///
    /// 書き込みに失敗した場合、[`RerankerError`] が返されます。
    pub fn write_weights<W>(&self, wtr: W) -> Result<()>
    where
        W: Write,
    {
        let mut wtr = BufWriter::new(wtr);
        for (index, weight) in self.weights().sorted_entries() {
            writeln!(&mut wtr, "{index}\t{weight}")?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// [`Model::write_weights`] の出力から重みを読み込み、推論可能な状態にします。
    ///
    /// 平均化の履歴と最良エポックの情報は破棄されます。
    ///
    /// # エラー
    ///
    /// 行の形式が不正な場合、重みが有限でない場合、インデックスがシンボル表に
    /// 登録されていない場合、[`RerankerError`] が返されます。
    pub fn read_weights<R>(&mut self, rdr: R) -> Result<()>
    where
        R: Read,
    {
        let reader = BufReader::new(rdr);
        let mut weights = FeatureVector::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let Some((index, weight)) = line.split_once('\t') else {
                return Err(RerankerError::invalid_format(
                    "weights",
                    "Each line must be a pair of an index and a weight",
                ));
            };
            let index: u32 = index.parse()?;
            let weight: f64 = weight.parse()?;
            if self.symbols.get_symbol(index).is_none() {
                return Err(RerankerError::invalid_format(
                    "weights",
                    format!("index {index} is not registered in the symbol table"),
                ));
            }
            if !weight.is_finite() {
                return Err(RerankerError::invalid_format(
                    "weights",
                    format!("weight of index {index} is not finite"),
                ));
            }
            weights.set(index, weight);
        }
        self.vectors.reset_to(weights);
        self.best_epoch = None;
        self.best_weights = None;
        self.state = ModelState::InferenceReady;
        Ok(())
    }
}
