//! The copy engine.
//!
//! Moves cells from source tiles into the user buffers, honoring buffer
//! capacity. A copy that cannot fit the next cell stops at the exact cell
//! boundary and reports [`ReadStatus::Incomplete`]; the bytes written so
//! far are left intact and reflected in the buffer size outputs.

use crate::{fill_value::FillValue, schema::AttributeId};

use super::{
    overlap::{OverlappingCellRange, OverlappingTileVec},
    ReadStatus, ReaderError,
};

/// Copy the cells of a fixed-sized attribute (or the coordinates
/// pseudo-attribute) for `cell_ranges` into `buffer`.
///
/// `buffer_size` is the write cursor: bytes already written on input, bytes
/// written in total on output. A `tile` of [`None`] writes one fill value
/// per cell.
pub(crate) fn copy_fixed_cells(
    tiles: &OverlappingTileVec,
    attr: AttributeId,
    cell_size: u64,
    fill: Option<&FillValue>,
    cell_ranges: &[OverlappingCellRange],
    buffer: &mut [u8],
    buffer_size: &mut u64,
) -> Result<ReadStatus, ReaderError> {
    let cell_size = usize::try_from(cell_size).unwrap();
    let mut offset = usize::try_from(*buffer_size).unwrap();
    for range in cell_ranges {
        let num_cells = range.end - range.start + 1;
        let remaining_cells = ((buffer.len() - offset) / cell_size) as u64;
        let fit = num_cells.min(remaining_cells);
        let fit_bytes = usize::try_from(fit).unwrap() * cell_size;
        match range.tile {
            Some(tile) => {
                let attr_tiles = tiles[tile]
                    .attr_tiles(attr)
                    .ok_or(ReaderError::Internal("attribute tile not read"))?;
                let src = attr_tiles.tile.bytes();
                let from = usize::try_from(range.start).unwrap() * cell_size;
                if from + fit_bytes > src.len() {
                    return Err(ReaderError::Internal("cell range exceeds the tile"));
                }
                buffer[offset..offset + fit_bytes].copy_from_slice(&src[from..from + fit_bytes]);
                offset += fit_bytes;
            }
            None => {
                let fill =
                    fill.ok_or(ReaderError::Internal("fill range without a fill value"))?;
                for _ in 0..fit {
                    buffer[offset..offset + cell_size].copy_from_slice(fill.as_ne_bytes());
                    offset += cell_size;
                }
            }
        }
        if fit < num_cells {
            *buffer_size = offset as u64;
            return Ok(ReadStatus::Incomplete);
        }
    }
    *buffer_size = offset as u64;
    Ok(ReadStatus::Completed)
}

/// Copy the cells of a variable-sized attribute for `cell_ranges` into the
/// offsets and values buffers.
///
/// The offsets buffer receives the running byte offset of each cell within
/// the values buffer (not the source offset). The copy stops at the last
/// cell for which both the offset and the value fit.
#[allow(clippy::too_many_arguments)]
pub(crate) fn copy_var_cells(
    tiles: &OverlappingTileVec,
    attr: AttributeId,
    fill: Option<&FillValue>,
    cell_ranges: &[OverlappingCellRange],
    buffer_off: &mut [u8],
    buffer_off_size: &mut u64,
    buffer_var: &mut [u8],
    buffer_var_size: &mut u64,
) -> Result<ReadStatus, ReaderError> {
    let mut off_cursor = usize::try_from(*buffer_off_size).unwrap();
    let mut var_cursor = usize::try_from(*buffer_var_size).unwrap();

    for range in cell_ranges {
        match range.tile {
            Some(tile) => {
                let attr_tiles = tiles[tile]
                    .attr_tiles(attr)
                    .ok_or(ReaderError::Internal("attribute tile not read"))?;
                let offsets = attr_tiles.tile.offsets()?;
                let var_tile = attr_tiles
                    .tile_var
                    .as_ref()
                    .ok_or(ReaderError::Internal("values tile not read"))?;
                let total = var_tile.size();
                for pos in range.start..=range.end {
                    let pos = usize::try_from(pos).unwrap();
                    if pos >= offsets.len() {
                        return Err(ReaderError::Internal("cell range exceeds the tile"));
                    }
                    let value_start = offsets[pos];
                    let value_end = if pos + 1 < offsets.len() {
                        offsets[pos + 1]
                    } else {
                        total
                    };
                    if value_start > value_end || value_end > total {
                        return Err(ReaderError::Internal("invalid offsets tile"));
                    }
                    let value = &var_tile.bytes()[usize::try_from(value_start).unwrap()
                        ..usize::try_from(value_end).unwrap()];
                    if write_var_cell(buffer_off, &mut off_cursor, buffer_var, &mut var_cursor, value)
                        == ReadStatus::Incomplete
                    {
                        *buffer_off_size = off_cursor as u64;
                        *buffer_var_size = var_cursor as u64;
                        return Ok(ReadStatus::Incomplete);
                    }
                }
            }
            None => {
                let fill =
                    fill.ok_or(ReaderError::Internal("fill range without a fill value"))?;
                for _ in range.start..=range.end {
                    if write_var_cell(
                        buffer_off,
                        &mut off_cursor,
                        buffer_var,
                        &mut var_cursor,
                        fill.as_ne_bytes(),
                    ) == ReadStatus::Incomplete
                    {
                        *buffer_off_size = off_cursor as u64;
                        *buffer_var_size = var_cursor as u64;
                        return Ok(ReadStatus::Incomplete);
                    }
                }
            }
        }
    }
    *buffer_off_size = off_cursor as u64;
    *buffer_var_size = var_cursor as u64;
    Ok(ReadStatus::Completed)
}

/// Write one variable-sized cell: its running offset into the offsets
/// buffer and its bytes into the values buffer.
#[allow(clippy::cast_possible_truncation)]
fn write_var_cell(
    buffer_off: &mut [u8],
    off_cursor: &mut usize,
    buffer_var: &mut [u8],
    var_cursor: &mut usize,
    value: &[u8],
) -> ReadStatus {
    if *off_cursor + 8 > buffer_off.len() || *var_cursor + value.len() > buffer_var.len() {
        return ReadStatus::Incomplete;
    }
    buffer_off[*off_cursor..*off_cursor + 8].copy_from_slice(&(*var_cursor as u64).to_ne_bytes());
    *off_cursor += 8;
    buffer_var[*var_cursor..*var_cursor + value.len()].copy_from_slice(value);
    *var_cursor += value.len();
    ReadStatus::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatype::{transmute_to_bytes, Datatype},
        reader::overlap::OverlappingTile,
        tile::{AttributeTiles, Tile},
    };

    fn tile_with_values(values: &[i32]) -> OverlappingTile {
        let mut tile = OverlappingTile::new(0, 0, 2, true);
        tile.set_attr_tiles_for_test(
            AttributeId(0),
            AttributeTiles {
                tile: Tile::new(Datatype::Int32, 4, transmute_to_bytes(values).to_vec()).unwrap(),
                tile_var: None,
            },
        );
        tile
    }

    fn tile_with_var_values(offsets: &[u64], values: &[u8]) -> OverlappingTile {
        let mut tile = OverlappingTile::new(0, 0, 2, true);
        tile.set_attr_tiles_for_test(
            AttributeId(0),
            AttributeTiles {
                tile: Tile::new(Datatype::UInt64, 8, transmute_to_bytes(offsets).to_vec())
                    .unwrap(),
                tile_var: Some(Tile::new(Datatype::Char, 1, values.to_vec()).unwrap()),
            },
        );
        tile
    }

    fn range(tile: Option<usize>, start: u64, end: u64) -> OverlappingCellRange {
        OverlappingCellRange { tile, start, end }
    }

    #[test]
    fn fixed_copy_with_fill() {
        let tiles = vec![tile_with_values(&[10, 11, 12, 13])];
        let fill = FillValue::from(-1i32);
        let mut buffer = vec![0u8; 24];
        let mut size = 0;
        let status = copy_fixed_cells(
            &tiles,
            AttributeId(0),
            4,
            Some(&fill),
            &[range(Some(0), 1, 2), range(None, 0, 2), range(Some(0), 0, 0)],
            &mut buffer,
            &mut size,
        )
        .unwrap();
        assert_eq!(status, ReadStatus::Completed);
        assert_eq!(size, 24);
        let out: Vec<i32> = crate::datatype::convert_from_bytes_slice(&buffer);
        assert_eq!(out, vec![11, 12, -1, -1, -1, 10]);
    }

    #[test]
    fn fixed_copy_truncates_at_cell_boundary() {
        let tiles = vec![tile_with_values(&[10, 11, 12, 13])];
        let mut buffer = vec![0u8; 10];
        let mut size = 0;
        let status = copy_fixed_cells(
            &tiles,
            AttributeId(0),
            4,
            None,
            &[range(Some(0), 0, 3)],
            &mut buffer,
            &mut size,
        )
        .unwrap();
        assert_eq!(status, ReadStatus::Incomplete);
        // Two whole cells fit in 10 bytes.
        assert_eq!(size, 8);
        let out: Vec<i32> = crate::datatype::convert_from_bytes_slice(&buffer[..8]);
        assert_eq!(out, vec![10, 11]);
    }

    #[test]
    fn var_copy_emits_running_offsets() {
        // Cells "a", "bb", "ccc".
        let tiles = vec![tile_with_var_values(&[0, 1, 3], b"abbccc")];
        let fill = FillValue::from(vec![b'?']);
        let mut offsets = vec![0u8; 4 * 8];
        let mut values = vec![0u8; 16];
        let (mut off_size, mut var_size) = (0, 0);
        let status = copy_var_cells(
            &tiles,
            AttributeId(0),
            Some(&fill),
            &[range(Some(0), 0, 2), range(None, 0, 0)],
            &mut offsets,
            &mut off_size,
            &mut values,
            &mut var_size,
        )
        .unwrap();
        assert_eq!(status, ReadStatus::Completed);
        assert_eq!(off_size, 32);
        assert_eq!(var_size, 7);
        let offsets: Vec<u64> = crate::datatype::convert_from_bytes_slice(&offsets);
        assert_eq!(offsets, vec![0, 1, 3, 6]);
        assert_eq!(&values[..7], b"abbccc?");
    }

    #[test]
    fn var_copy_stops_before_overflowing_either_buffer() {
        // Five 8-byte cells; buffers hold two cells.
        let offsets_tile: Vec<u64> = vec![0, 8, 16, 24, 32];
        let values_tile = vec![7u8; 40];
        let tiles = vec![tile_with_var_values(&offsets_tile, &values_tile)];
        let mut offsets = vec![0u8; 16];
        let mut values = vec![0u8; 16];
        let (mut off_size, mut var_size) = (0, 0);
        let status = copy_var_cells(
            &tiles,
            AttributeId(0),
            None,
            &[range(Some(0), 0, 4)],
            &mut offsets,
            &mut off_size,
            &mut values,
            &mut var_size,
        )
        .unwrap();
        assert_eq!(status, ReadStatus::Incomplete);
        assert_eq!(off_size, 16);
        assert_eq!(var_size, 16);
        let offsets: Vec<u64> = crate::datatype::convert_from_bytes_slice(&offsets);
        assert_eq!(offsets, vec![0, 8]);
    }
}
