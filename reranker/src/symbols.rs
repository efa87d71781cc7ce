//! シンボル表のモジュール。
//!
//! 素性名（文字列）と密な整数インデックスの双方向の対応を管理します。
//! インデックスは0から順に割り当てられ、表が存在する間は再利用されません。
//!
//! 2種類の実装があります。
//!
//! - [`LocalSymbolTable`]: 1つのモデルが所有する表。排他制御を行いません。
//! - [`SharedSymbolTable`]: 複数の学習で共有できる表のハンドル。
//!   クローンはすべて同じ表を指し、インデックスの割り当てはミューテックスで直列化されます。
//!
//! どちらも [`TableId`] を持ち、候補集合がどの表に対してコンパイルされたかを
//! モデルが照合するために使用します。

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use hashbrown::hash_map::EntryRef;
use parking_lot::Mutex;

use crate::errors::{RerankerError, Result};
use crate::utils::FromU32;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(0);

/// シンボル表の識別子。
///
/// プロセス内で一意です。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TableId(u64);

impl TableId {
    fn fresh() -> Self {
        Self(NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// シンボル表の共通インターフェース。
pub trait Symbols {
    /// 素性名に対応するインデックスを返します。
    ///
    /// 未登録の名前であれば次のインデックスを割り当てて登録します。
    /// 同じ名前に対する呼び出しは常に同じインデックスを返します。
    fn index_of(&mut self, symbol: &str) -> u32;

    /// 登録済みの素性名のインデックスを返します。登録は行いません。
    fn get_index(&self, symbol: &str) -> Option<u32>;

    /// インデックスに対応する素性名を返します。
    fn get_symbol(&self, index: u32) -> Option<String>;

    /// 登録済みのシンボル数を返します。
    fn size(&self) -> usize;

    /// 以前に保存した対応を復元します。
    ///
    /// # エラー
    ///
    /// 名前が別のインデックスで登録済みの場合や、インデックスが別の名前で
    /// 使用済みの場合、[`RerankerError`] が返されます。
    fn set_index(&mut self, symbol: &str, index: u32) -> Result<()>;

    /// すべての `(名前, インデックス)` をインデックスの昇順で返します。
    fn entries(&self) -> Vec<(String, u32)>;

    /// インデックスが名前に割り当てられていれば `true` を返します。
    ///
    /// 復元された表ではインデックスに欠番がありうるため、
    /// [`Symbols::size`] との比較では判定できません。
    fn contains_index(&self, index: u32) -> bool;

    /// 表の識別子を返します。
    fn table_id(&self) -> TableId;
}

/// 1つのモデルが所有するシンボル表。
#[derive(Debug)]
pub struct LocalSymbolTable {
    id: TableId,
    indices: HashMap<String, u32>,

    // Restored tables may contain holes, hence `Option`.
    names: Vec<Option<String>>,
}

impl Default for LocalSymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for LocalSymbolTable {
    // A clone may diverge from the original, so it gets its own identity.
    fn clone(&self) -> Self {
        Self {
            id: TableId::fresh(),
            indices: self.indices.clone(),
            names: self.names.clone(),
        }
    }
}

impl LocalSymbolTable {
    /// 空のシンボル表を作成します。
    pub fn new() -> Self {
        Self {
            id: TableId::fresh(),
            indices: HashMap::new(),
            names: vec![],
        }
    }

    /// インデックスに対応する素性名を借用で返します。
    pub fn symbol(&self, index: u32) -> Option<&str> {
        self.names
            .get(usize::from_u32(index))
            .and_then(|name| name.as_deref())
    }

    /// 次に割り当てられるインデックス
    fn next_index(&self) -> u32 {
        // The number of symbols is bounded by the u32 index space.
        u32::try_from(self.names.len()).unwrap_or(u32::MAX)
    }
}

impl Symbols for LocalSymbolTable {
    fn index_of(&mut self, symbol: &str) -> u32 {
        let next = self.next_index();
        match self.indices.entry_ref(symbol) {
            EntryRef::Occupied(e) => *e.get(),
            EntryRef::Vacant(e) => {
                e.insert(next);
                self.names.push(Some(symbol.to_string()));
                next
            }
        }
    }

    fn get_index(&self, symbol: &str) -> Option<u32> {
        self.indices.get(symbol).copied()
    }

    fn get_symbol(&self, index: u32) -> Option<String> {
        self.symbol(index).map(str::to_string)
    }

    fn size(&self) -> usize {
        self.indices.len()
    }

    fn set_index(&mut self, symbol: &str, index: u32) -> Result<()> {
        if let Some(&existing) = self.indices.get(symbol) {
            if existing == index {
                return Ok(());
            }
            return Err(RerankerError::invalid_argument(
                "symbol",
                format!("'{symbol}' is already registered with index {existing}, not {index}"),
            ));
        }
        let pos = usize::from_u32(index);
        if let Some(Some(other)) = self.names.get(pos) {
            return Err(RerankerError::invalid_argument(
                "index",
                format!("index {index} is already used by '{other}'"),
            ));
        }
        if pos >= self.names.len() {
            self.names.resize(pos + 1, None);
        }
        self.names[pos] = Some(symbol.to_string());
        self.indices.insert(symbol.to_string(), index);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, u32)> {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                let name = name.as_ref()?;
                Some((name.clone(), u32::try_from(i).ok()?))
            })
            .collect()
    }

    fn contains_index(&self, index: u32) -> bool {
        self.symbol(index).is_some()
    }

    fn table_id(&self) -> TableId {
        self.id
    }
}

/// 複数の利用者で共有されるシンボル表のハンドル。
///
/// クローンは同じ表と同じ [`TableId`] を共有します。
/// 実行ごとに1つ作成し、必要なコンポーネントへ明示的に渡してください。
#[derive(Clone, Debug, Default)]
pub struct SharedSymbolTable {
    inner: Arc<Mutex<LocalSymbolTable>>,
}

impl SharedSymbolTable {
    /// 空の共有シンボル表を作成します。
    pub fn new() -> Self {
        Self::default()
    }

    /// 内容をコピーしたローカルな表を作成します。
    pub fn to_local(&self) -> LocalSymbolTable {
        self.inner.lock().clone()
    }
}

impl Symbols for SharedSymbolTable {
    fn index_of(&mut self, symbol: &str) -> u32 {
        self.inner.lock().index_of(symbol)
    }

    fn get_index(&self, symbol: &str) -> Option<u32> {
        self.inner.lock().get_index(symbol)
    }

    fn get_symbol(&self, index: u32) -> Option<String> {
        self.inner.lock().get_symbol(index)
    }

    fn size(&self) -> usize {
        self.inner.lock().size()
    }

    fn set_index(&mut self, symbol: &str, index: u32) -> Result<()> {
        self.inner.lock().set_index(symbol, index)
    }

    fn entries(&self) -> Vec<(String, u32)> {
        self.inner.lock().entries()
    }

    fn contains_index(&self, index: u32) -> bool {
        self.inner.lock().contains_index(index)
    }

    fn table_id(&self) -> TableId {
        self.inner.lock().table_id()
    }
}

/// モデルが保持するシンボル表。
#[derive(Clone, Debug)]
pub enum SymbolTable {
    /// モデル専用の表
    Local(LocalSymbolTable),
    /// 共有された表
    Shared(SharedSymbolTable),
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::Local(LocalSymbolTable::new())
    }
}

impl From<LocalSymbolTable> for SymbolTable {
    fn from(table: LocalSymbolTable) -> Self {
        Self::Local(table)
    }
}

impl From<SharedSymbolTable> for SymbolTable {
    fn from(table: SharedSymbolTable) -> Self {
        Self::Shared(table)
    }
}

impl Symbols for SymbolTable {
    fn index_of(&mut self, symbol: &str) -> u32 {
        match self {
            Self::Local(t) => t.index_of(symbol),
            Self::Shared(t) => t.index_of(symbol),
        }
    }

    fn get_index(&self, symbol: &str) -> Option<u32> {
        match self {
            Self::Local(t) => t.get_index(symbol),
            Self::Shared(t) => t.get_index(symbol),
        }
    }

    fn get_symbol(&self, index: u32) -> Option<String> {
        match self {
            Self::Local(t) => t.get_symbol(index),
            Self::Shared(t) => t.get_symbol(index),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::Local(t) => t.size(),
            Self::Shared(t) => t.size(),
        }
    }

    fn set_index(&mut self, symbol: &str, index: u32) -> Result<()> {
        match self {
            Self::Local(t) => t.set_index(symbol, index),
            Self::Shared(t) => t.set_index(symbol, index),
        }
    }

    fn entries(&self) -> Vec<(String, u32)> {
        match self {
            Self::Local(t) => t.entries(),
            Self::Shared(t) => t.entries(),
        }
    }

    fn contains_index(&self, index: u32) -> bool {
        match self {
            Self::Local(t) => t.contains_index(index),
            Self::Shared(t) => t.contains_index(index),
        }
    }

    fn table_id(&self) -> TableId {
        match self {
            Self::Local(t) => t.table_id(),
            Self::Shared(t) => t.table_id(),
        }
    }
}

/// シンボル表を `名前\tインデックス` の行としてインデックス順に書き出します。
///
/// # エラー
///
/// 書き込みに失敗した場合、I/Oエラーが返されます。
pub fn write_symbols<S, W>(symbols: &S, wtr: W) -> Result<()>
where
    S: Symbols + ?Sized,
    W: Write,
{
    let mut wtr = BufWriter::new(wtr);
    for (name, index) in symbols.entries() {
        writeln!(&mut wtr, "{name}\t{index}")?;
    }
    wtr.flush()?;
    Ok(())
}

/// [`write_symbols`] の出力から対応を復元します。
///
/// # エラー
///
/// 行の形式が不正な場合や [`Symbols::set_index`] が失敗した場合、
/// [`RerankerError`] が返されます。
pub fn read_symbols<S, R>(symbols: &mut S, rdr: R) -> Result<()>
where
    S: Symbols + ?Sized,
    R: Read,
{
    let reader = BufReader::new(rdr);
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let Some((name, index)) = line.rsplit_once('\t') else {
            return Err(RerankerError::invalid_format(
                "symbols",
                "Each line must be a pair of a symbol and its index",
            ));
        };
        symbols.set_index(name, index.parse()?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_of_idempotent() {
        let mut table = LocalSymbolTable::new();
        assert_eq!(0, table.index_of("lm"));
        assert_eq!(1, table.index_of("len"));
        assert_eq!(0, table.index_of("lm"));
        assert_eq!(2, table.index_of("w:the"));
        assert_eq!(3, table.size());
        assert_eq!(Some(1), table.get_index("len"));
        assert_eq!(None, table.get_index("missing"));
        assert_eq!(Some("w:the"), table.symbol(2));
    }

    #[test]
    fn test_distinct_names_distinct_indices() {
        let mut table = LocalSymbolTable::new();
        let names = ["a", "b", "c", "a", "d", "b"];
        let mut seen = hashbrown::HashMap::new();
        for name in names {
            let idx = table.index_of(name);
            if let Some(prev) = seen.insert(idx, name) {
                assert_eq!(prev, name);
            }
        }
        assert_eq!(4, table.size());
    }

    #[test]
    fn test_set_index() {
        let mut table = LocalSymbolTable::new();
        table.set_index("x", 3).unwrap();
        table.set_index("y", 0).unwrap();
        table.set_index("x", 3).unwrap();
        assert!(table.set_index("x", 1).is_err());
        assert!(table.set_index("z", 0).is_err());
        assert_eq!(2, table.size());
        assert!(table.contains_index(3));
        assert!(!table.contains_index(1));
        assert!(!table.contains_index(4));

        // allocation continues after the largest restored index
        assert_eq!(4, table.index_of("w"));
        assert_eq!(
            vec![
                ("y".to_string(), 0),
                ("x".to_string(), 3),
                ("w".to_string(), 4),
            ],
            table.entries()
        );
    }

    #[test]
    fn test_shared_table_clones_share_state() {
        let mut a = SharedSymbolTable::new();
        let mut b = a.clone();
        assert_eq!(0, a.index_of("lm"));
        assert_eq!(0, b.index_of("lm"));
        assert_eq!(1, b.index_of("len"));
        assert_eq!(2, a.size());
        assert_eq!(a.table_id(), b.table_id());
    }

    #[test]
    fn test_shared_table_concurrent_allocation() {
        let table = SharedSymbolTable::new();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mut table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        table.index_of(&format!("f{}", (i * 7 + t) % 150));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let entries = table.entries();
        assert_eq!(table.size(), entries.len());
        for (i, (_, idx)) in entries.iter().enumerate() {
            assert_eq!(i, usize::from_u32(*idx));
        }
    }

    #[test]
    fn test_local_clone_has_new_id() {
        let table = LocalSymbolTable::new();
        let copy = table.clone();
        assert_ne!(table.table_id(), copy.table_id());
    }

    #[test]
    fn test_write_read_symbols() {
        let mut table = LocalSymbolTable::new();
        table.index_of("lm");
        table.index_of("a=b");
        table.index_of("w:the");

        let mut buf = vec![];
        write_symbols(&table, &mut buf).unwrap();
        assert_eq!("lm\t0\na=b\t1\nw:the\t2\n", String::from_utf8(buf.clone()).unwrap());

        let mut restored = SymbolTable::default();
        read_symbols(&mut restored, buf.as_slice()).unwrap();
        assert_eq!(table.entries(), restored.entries());
    }

    #[test]
    fn test_read_symbols_invalid() {
        let mut table = LocalSymbolTable::new();
        assert!(read_symbols(&mut table, "lm 0\n".as_bytes()).is_err());
        assert!(read_symbols(&mut table, "lm\tzero\n".as_bytes()).is_err());
    }
}
