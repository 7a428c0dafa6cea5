use strum::IntoEnumIterator;

use crate::{
    file::{io::read_le_at_dyn, parser::Parser},
    metadata::tables::{Column, TableId, TableInfo},
    Error::{NotSupported, OutOfBounds},
    Result,
};

/// The `#~` stream header plus the location of every physical table inside the stream.
///
/// Rows are not materialized; callers read single cells through [`TablesHeader::cell`] or
/// resolve the byte offset of a cell with [`TablesHeader::cell_offset`] when it has to be
/// patched in place.
///
/// ## Reference
/// * '<https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf>' - II.24.2.6 && II.22
pub struct TablesHeader<'a> {
    /// Major version of table schemata, shall be 2
    pub major_version: u8,
    /// Minor version of table schemata, shall be 0
    pub minor_version: u8,
    /// Bit vector of present tables
    pub valid: u64,
    /// Bit vector of sorted tables
    pub sorted: u64,
    /// Row counts and index widths
    pub info: TableInfo,
    data: &'a [u8],
    /// Start of each table relative to the beginning of the stream
    offsets: Vec<usize>,
}

impl<'a> TablesHeader<'a> {
    /// Parse the header at the start of `data` and lay out all present tables.
    ///
    /// # Errors
    /// Returns [`NotSupported`] if a table id beyond the physical metadata format is
    /// marked present, or an error if the stream is truncated.
    pub fn from(data: &'a [u8]) -> Result<TablesHeader<'a>> {
        let mut parser = Parser::new(data);

        let _reserved = parser.read_le::<u32>()?;
        let major_version = parser.read_le::<u8>()?;
        let minor_version = parser.read_le::<u8>()?;
        let heap_sizes = parser.read_le::<u8>()?;
        let _reserved = parser.read_le::<u8>()?;
        let valid = parser.read_le::<u64>()?;
        let sorted = parser.read_le::<u64>()?;

        if valid == 0 {
            return Err(malformed_error!("No valid rows in any of the tables"));
        }
        if valid >> (u32::from(TableId::MAX) + 1) != 0 {
            return Err(NotSupported);
        }

        let mut rows = vec![0u32; TableId::count()];
        for table in TableId::iter() {
            if valid & (1u64 << table as u8) != 0 {
                rows[table.index()] = parser.read_le::<u32>()?;
            }
        }

        if heap_sizes & 0x40 != 0 {
            let _extra = parser.read_le::<u32>()?;
        }

        let info = TableInfo::new(heap_sizes, &rows);

        let mut offsets = Vec::with_capacity(TableId::count());
        let mut current = parser.pos();
        for table in TableId::iter() {
            offsets.push(current);

            let size = (info.rows(table) as usize)
                .checked_mul(info.row_size(table))
                .ok_or(OutOfBounds)?;
            current = current.checked_add(size).ok_or(OutOfBounds)?;
        }

        if current > data.len() {
            return Err(OutOfBounds);
        }

        Ok(TablesHeader {
            major_version,
            minor_version,
            valid,
            sorted,
            info,
            data,
            offsets,
        })
    }

    /// Number of present tables
    #[must_use]
    pub fn table_count(&self) -> u32 {
        self.valid.count_ones()
    }

    /// Row count of `table`, 0 when absent
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.info.rows(table)
    }

    /// Offset of row `rid` (1-based) of `table`, relative to the stream start.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] for row 0 or a row past the end of the table.
    pub fn row_offset(&self, table: TableId, rid: u32) -> Result<usize> {
        if rid == 0 || rid > self.row_count(table) {
            return Err(OutOfBounds);
        }

        Ok(self.offsets[table.index()] + (rid as usize - 1) * self.info.row_size(table))
    }

    /// Offset and width of column `column` of row `rid`, relative to the stream start.
    ///
    /// # Errors
    /// Returns an error if the row or column does not exist.
    pub fn cell_offset(&self, table: TableId, rid: u32, column: usize) -> Result<(usize, usize)> {
        let columns = table.columns();
        if column >= columns.len() {
            return Err(OutOfBounds);
        }

        let skipped: usize = columns[..column]
            .iter()
            .map(|column| column.size(&self.info))
            .sum();

        Ok((
            self.row_offset(table, rid)? + skipped,
            columns[column].size(&self.info),
        ))
    }

    /// Value of one cell, widened to `u32`.
    ///
    /// # Errors
    /// Returns an error if the row or column does not exist.
    pub fn cell(&self, table: TableId, rid: u32, column: usize) -> Result<u32> {
        let (mut offset, width) = self.cell_offset(table, rid, column)?;
        read_le_at_dyn(self.data, &mut offset, width == 4)
    }

    /// All cells of one row, widened to `u32`.
    ///
    /// # Errors
    /// Returns an error if the row does not exist.
    pub fn row(&self, table: TableId, rid: u32) -> Result<Vec<u32>> {
        let mut offset = self.row_offset(table, rid)?;

        table
            .columns()
            .iter()
            .map(|column: &Column| {
                read_le_at_dyn(self.data, &mut offset, column.size(&self.info) == 4)
            })
            .collect()
    }
}
