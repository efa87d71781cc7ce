//! 候補集合のテキスト形式の読み書き。
//!
//! 1つの候補集合は次の形式で表されます。
//!
//! ```text
//! @key	utt-001
//! @reference	the cat sat
//! @gold	0
//! 0.0	-12.5	the cat sat	lm=-12.5 len=3 w:cat
//! 0.33	-11.0	the cat sad	lm=-11.0 len=3
//! EOS
//! ```
//!
//! 候補の行はタブ区切りで、損失、ベースラインスコア、生データ、記号素性の順です。
//! 記号素性は空白区切りの `name=value` で、値を省略すると1.0になります。
//! `@gold` は省略可能です。`#` で始まる行と空行は無視されます。

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use crate::candidate::Candidate;
use crate::candidate_set::CandidateSet;
use crate::errors::{RerankerError, Result};
use crate::feature_vector::FeatureVector;
use crate::symbols::Symbols;
use crate::utils::{parse_feature_token, write_feature_token};

const END_OF_SET: &str = "EOS";

/// 候補集合の読み込み器。
#[derive(Clone, Debug)]
pub struct CandidateSetReader {
    max_num_to_read: Option<usize>,
    max_candidates_per_set: Option<usize>,
    reporting_interval: usize,
}

impl Default for CandidateSetReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateSetReader {
    /// 制限なしの読み込み器を作成します。
    pub fn new() -> Self {
        Self {
            max_num_to_read: None,
            max_candidates_per_set: None,
            reporting_interval: 1000,
        }
    }

    /// 読み込む候補集合の最大数を設定します。
    ///
    /// # パニック
    ///
    /// 値は1以上である必要があります。
    pub fn max_num_to_read(mut self, n: usize) -> Self {
        assert!(n >= 1, "max_num_to_read must be >= 1");
        self.max_num_to_read = Some(n);
        self
    }

    /// 1つの候補集合から読み込む候補の最大数を設定します。
    ///
    /// # パニック
    ///
    /// 値は1以上である必要があります。
    pub fn max_candidates_per_set(mut self, n: usize) -> Self {
        assert!(n >= 1, "max_candidates_per_set must be >= 1");
        self.max_candidates_per_set = Some(n);
        self
    }

    /// 進捗をログに出力する間隔（候補集合数）を設定します。0で出力しません。
    pub fn reporting_interval(mut self, n: usize) -> Self {
        self.reporting_interval = n;
        self
    }

    /// テキストから候補集合を読み込みます。
    ///
    /// 読み込んだ損失は計算済みとして扱われます。
    ///
    /// # 引数
    ///
    /// * `rdr` - 候補集合のテキストを読み込むリーダー
    ///
    /// # 戻り値
    ///
    /// 読み込まれた候補集合
    ///
    /// # エラー
    ///
    /// テキストの形式が不正な場合、[`RerankerError`] が返されます。
    pub fn read<R>(&self, rdr: R) -> Result<Vec<CandidateSet>>
    where
        R: Read,
    {
        let reader = BufReader::new(rdr);
        let mut sets = vec![];
        let mut current: Option<CandidateSet> = None;
        let mut num_dropped = 0;

        for (i, line) in reader.lines().enumerate() {
            if self.max_num_to_read.is_some_and(|max| sets.len() >= max) {
                break;
            }
            let line = line?;
            let line_no = i + 1;
            let trimmed = line.trim_end_matches('\r');
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let set = current.get_or_insert_with(|| CandidateSet::new(sets.len().to_string()));

            if trimmed == END_OF_SET {
                let mut set = current.take().unwrap_or_default();
                self.finish_set(&mut set, num_dropped);
                num_dropped = 0;
                sets.push(set);
                if self.reporting_interval != 0 && sets.len() % self.reporting_interval == 0 {
                    log::info!("Read {} candidate sets", sets.len());
                }
                continue;
            }

            if let Some(directive) = trimmed.strip_prefix('@') {
                let (name, value) = directive.split_once('\t').ok_or_else(|| {
                    RerankerError::invalid_format(
                        "candidate set",
                        format!("line {line_no}: a directive must be followed by a tab"),
                    )
                })?;
                match name {
                    "key" => set.set_training_key(value),
                    "reference" => set.set_reference(value),
                    "gold" => set.set_gold_index(Some(value.trim().parse()?)),
                    _ => {
                        return Err(RerankerError::invalid_format(
                            "candidate set",
                            format!("line {line_no}: unknown directive '@{name}'"),
                        ));
                    }
                }
                continue;
            }

            if self
                .max_candidates_per_set
                .is_some_and(|max| set.len() >= max)
            {
                num_dropped += 1;
                continue;
            }
            set.push(parse_candidate_line(trimmed, line_no)?);
        }

        if current.is_some() {
            return Err(RerankerError::invalid_format(
                "candidate set",
                format!("the last candidate set is not terminated by {END_OF_SET}"),
            ));
        }
        Ok(sets)
    }

    fn finish_set(&self, set: &mut CandidateSet, num_dropped: usize) {
        set.set_losses_computed(true);
        if num_dropped != 0 {
            log::debug!(
                "Dropped {num_dropped} candidates of '{}' beyond the limit",
                set.training_key()
            );
        }
        if let Some(max) = self.max_candidates_per_set {
            set.truncate(max);
            if set.gold_index().is_some_and(|gold| gold >= max) {
                log::warn!(
                    "Gold candidate of '{}' was dropped by the candidate limit",
                    set.training_key()
                );
                set.set_gold_index(None);
            }
        }
    }
}

fn parse_candidate_line(line: &str, line_no: usize) -> Result<Candidate> {
    let mut cols = line.splitn(4, '\t');
    let (Some(loss), Some(baseline), Some(raw)) = (cols.next(), cols.next(), cols.next()) else {
        return Err(RerankerError::invalid_format(
            "candidate set",
            format!("line {line_no}: a candidate needs loss, baseline score and raw data"),
        ));
    };
    let mut features = FeatureVector::new();
    if let Some(tokens) = cols.next() {
        for token in tokens.split_whitespace() {
            let (name, value) = parse_feature_token(token)?;
            features.increment(name.to_string(), value);
        }
    }
    Ok(Candidate::new(0, raw)
        .with_loss(loss.trim().parse()?)
        .with_baseline_score(baseline.trim().parse()?)
        .with_symbolic_features(features))
}

/// 候補集合をテキスト形式で書き出す書き込み器。
pub struct CandidateSetWriter<'a, W>
where
    W: Write,
{
    wtr: BufWriter<W>,
    symbols: Option<&'a dyn Symbols>,
}

impl<'a, W> CandidateSetWriter<'a, W>
where
    W: Write,
{
    /// 新しい書き込み器を作成します。
    pub fn new(wtr: W) -> Self {
        Self {
            wtr: BufWriter::new(wtr),
            symbols: None,
        }
    }

    /// コンパイル済みの素性を名前に戻すためのシンボル表を設定します。
    pub fn symbols(mut self, symbols: &'a dyn Symbols) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// 候補集合を1つ書き出します。
    ///
    /// 記号素性とコンパイル済みの素性は名前で合算され、名前順に出力されます。
    ///
    /// # エラー
    ///
    /// 生データにタブや改行が含まれる場合、シンボル表なしでコンパイル済みの素性を
    /// 書き出そうとした場合、書き込みに失敗した場合に [`RerankerError`] が返されます。
    pub fn write(&mut self, set: &CandidateSet) -> Result<()> {
        writeln!(self.wtr, "@key\t{}", set.training_key())?;
        if !set.reference().is_empty() {
            writeln!(self.wtr, "@reference\t{}", set.reference())?;
        }
        if let Some(gold) = set.gold_index() {
            writeln!(self.wtr, "@gold\t{gold}")?;
        }
        for candidate in set.iter() {
            if candidate.raw_data().contains(['\t', '\n']) {
                return Err(RerankerError::invalid_argument(
                    "candidate",
                    format!(
                        "raw data of candidate {} of '{}' contains a tab or newline",
                        candidate.index(),
                        set.training_key()
                    ),
                ));
            }
            write!(
                self.wtr,
                "{}\t{}\t{}\t",
                candidate.loss(),
                candidate.baseline_score(),
                candidate.raw_data()
            )?;
            let features = self.named_features(candidate)?;
            for (i, (name, value)) in features.sorted_entries().iter().enumerate() {
                if i != 0 {
                    write!(self.wtr, " ")?;
                }
                write_feature_token(&mut self.wtr, name, *value)?;
            }
            writeln!(self.wtr)?;
        }
        writeln!(self.wtr, "{END_OF_SET}")?;
        Ok(())
    }

    fn named_features(&self, candidate: &Candidate) -> Result<FeatureVector<String>> {
        if candidate.is_compiled() {
            // The compiled vector already includes any kept symbolic features.
            let mut named = FeatureVector::new();
            if candidate.features().is_empty() {
                return Ok(named);
            }
            let symbols = self.symbols.ok_or_else(|| {
                RerankerError::invalid_state(
                    "writing a candidate set",
                    "compiled features need a symbol table to be written",
                )
            })?;
            for (&index, value) in candidate.features().iter() {
                let name = symbols.get_symbol(index).ok_or_else(|| {
                    RerankerError::invalid_state(
                        "writing a candidate set",
                        format!("symbol index {index} is not registered"),
                    )
                })?;
                named.increment(name, value);
            }
            Ok(named)
        } else {
            Ok(candidate.symbolic_features().clone())
        }
    }

    /// バッファを書き出します。
    pub fn finish(mut self) -> Result<()> {
        self.wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::symbols::LocalSymbolTable;

    const TWO_SETS: &str = "\
# comment
@key\tutt-1
@reference\tthe cat sat
@gold\t0
0\t-10.5\tthe cat sat\tlm=-10.5 w:cat
0.5\t-9\tthe cat\tlm=-9

EOS
@key\tutt-2
1\t0\ta dog\t
0\t0\tthe dog
EOS
";

    #[test]
    fn test_read() {
        let sets = CandidateSetReader::new().read(TWO_SETS.as_bytes()).unwrap();
        assert_eq!(2, sets.len());

        let first = &sets[0];
        assert_eq!("utt-1", first.training_key());
        assert_eq!("the cat sat", first.reference());
        assert_eq!(3, first.reference_token_count());
        assert_eq!(Some(0), first.gold_index());
        assert!(first.losses_computed());
        assert_eq!(2, first.len());
        assert_eq!(-10.5, first[0].baseline_score());
        assert_eq!(1.0, first[0].symbolic_features().weight(&"w:cat".to_string()));
        assert_eq!(0.5, first[1].loss());
        assert_eq!(1, first[1].index());

        let second = &sets[1];
        assert_eq!(None, second.gold_index());
        assert!(second[0].symbolic_features().is_empty());
        assert_eq!("the dog", second[1].raw_data());
    }

    #[test]
    fn test_read_limits() {
        let sets = CandidateSetReader::new()
            .max_num_to_read(1)
            .max_candidates_per_set(1)
            .read(TWO_SETS.as_bytes())
            .unwrap();
        assert_eq!(1, sets.len());
        assert_eq!(1, sets[0].len());
        assert_eq!(Some(0), sets[0].gold_index());
    }

    #[test]
    fn test_read_drops_truncated_gold() {
        let text = "@gold\t1\n0\t0\ta\n0\t0\tb\nEOS\n";
        let sets = CandidateSetReader::new()
            .max_candidates_per_set(1)
            .read(text.as_bytes())
            .unwrap();
        assert_eq!("0", sets[0].training_key());
        assert_eq!(None, sets[0].gold_index());
    }

    #[test]
    fn test_read_invalid() {
        let reader = CandidateSetReader::new();
        assert!(reader.read("0\t0\ta\n".as_bytes()).is_err());
        assert!(reader.read("0\t0\nEOS\n".as_bytes()).is_err());
        assert!(reader.read("x\t0\ta\nEOS\n".as_bytes()).is_err());
        assert!(reader.read("@color\tred\nEOS\n".as_bytes()).is_err());
        assert!(reader.read("0\t0\ta\t=1\nEOS\n".as_bytes()).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let mut sets = CandidateSetReader::new().read(TWO_SETS.as_bytes()).unwrap();
        let mut table = LocalSymbolTable::new();
        sets[0].compile_features(&mut table, true).unwrap();

        let mut buf = vec![];
        let mut writer = CandidateSetWriter::new(&mut buf).symbols(&table);
        for set in &sets {
            writer.write(set).unwrap();
        }
        writer.finish().unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with(
            "@key\tutt-1\n@reference\tthe cat sat\n@gold\t0\n0\t-10.5\tthe cat sat\tlm=-10.5 w:cat\n"
        ));

        let reread = CandidateSetReader::new().read(text.as_bytes()).unwrap();
        assert_eq!(sets.len(), reread.len());
        assert_eq!(
            sets[1][1].symbolic_features(),
            reread[1][1].symbolic_features()
        );
        assert_eq!(
            -9.0,
            reread[0][1].symbolic_features().weight(&"lm".to_string())
        );
    }

    #[test]
    fn test_write_compiled_without_symbols() {
        let mut sets = CandidateSetReader::new().read(TWO_SETS.as_bytes()).unwrap();
        let mut table = LocalSymbolTable::new();
        sets[0].compile_features(&mut table, true).unwrap();
        let mut writer = CandidateSetWriter::new(Vec::<u8>::new());
        assert!(writer.write(&sets[0]).is_err());
    }
}
