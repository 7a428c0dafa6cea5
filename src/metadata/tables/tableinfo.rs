use crate::metadata::tables::{CodedIndexType, TableId};

/// Row counts of all tables plus the heap size flags, which together decide how wide every
/// index column of the `#~` stream is.
///
/// ## Reference
/// * '<https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf>' - II.24.2.6
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableInfo {
    rows: Vec<u32>,
    large_str: bool,
    large_guid: bool,
    large_blob: bool,
}

impl TableInfo {
    /// Build from the `HeapSizes` byte and the row count of every table (0 for absent ones).
    #[must_use]
    pub fn new(heap_sizes: u8, rows: &[u32]) -> TableInfo {
        let mut counts = vec![0u32; TableId::count()];
        for (slot, count) in counts.iter_mut().zip(rows) {
            *slot = *count;
        }

        TableInfo {
            rows: counts,
            large_str: heap_sizes & 0x01 != 0,
            large_guid: heap_sizes & 0x02 != 0,
            large_blob: heap_sizes & 0x04 != 0,
        }
    }

    /// Row count of `table`
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows.get(table.index()).copied().unwrap_or(0)
    }

    /// Width of a `#Strings` index
    #[must_use]
    pub fn str_bytes(&self) -> usize {
        if self.large_str {
            4
        } else {
            2
        }
    }

    /// Width of a `#GUID` index
    #[must_use]
    pub fn guid_bytes(&self) -> usize {
        if self.large_guid {
            4
        } else {
            2
        }
    }

    /// Width of a `#Blob` index
    #[must_use]
    pub fn blob_bytes(&self) -> usize {
        if self.large_blob {
            4
        } else {
            2
        }
    }

    /// Width of a simple index into `table`
    #[must_use]
    pub fn table_index_bytes(&self, table: TableId) -> usize {
        if self.rows(table) > u32::from(u16::MAX) {
            4
        } else {
            2
        }
    }

    /// Width of a coded index of kind `coded`
    #[must_use]
    pub fn coded_index_bytes(&self, coded: CodedIndexType) -> usize {
        let max_rows = coded
            .tables()
            .iter()
            .flatten()
            .map(|table| self.rows(*table))
            .max()
            .unwrap_or(0);

        if u64::from(max_rows) < (1u64 << (16 - coded.tag_bits())) {
            2
        } else {
            4
        }
    }

    /// Size in bytes of one row of `table`
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        table.columns().iter().map(|column| column.size(self)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_flags() {
        let info = TableInfo::new(0x05, &[]);
        assert_eq!(info.str_bytes(), 4);
        assert_eq!(info.guid_bytes(), 2);
        assert_eq!(info.blob_bytes(), 4);
        assert_eq!(info.row_size(TableId::Module), 14);
    }

    #[test]
    fn coded_index_growth() {
        let mut rows = vec![0u32; TableId::count()];
        rows[TableId::TypeRef.index()] = 0x3FFF;
        let info = TableInfo::new(0, &rows);
        assert_eq!(info.coded_index_bytes(CodedIndexType::TypeDefOrRef), 2);

        rows[TableId::TypeRef.index()] = 0x4000;
        let info = TableInfo::new(0, &rows);
        assert_eq!(info.coded_index_bytes(CodedIndexType::TypeDefOrRef), 4);
        assert_eq!(info.coded_index_bytes(CodedIndexType::HasSemantics), 2);
        assert_eq!(info.table_index_bytes(TableId::TypeRef), 2);
        assert_eq!(info.row_size(TableId::TypeDef), 16);
    }

    #[test]
    fn large_table() {
        let mut rows = vec![0u32; TableId::count()];
        rows[TableId::Param.index()] = 0x1_0000;
        let info = TableInfo::new(0, &rows);
        assert_eq!(info.table_index_bytes(TableId::Param), 4);
        assert_eq!(info.row_size(TableId::MethodDef), 16);
    }
}
