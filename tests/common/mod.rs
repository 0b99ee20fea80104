//! Shared test fixtures: build fragments directly in a memory store.

#![allow(dead_code)]

use std::sync::Arc;

use tilestore::datatype::{convert_from_bytes_slice, transmute_to_bytes, Coordinate};
use tilestore::fragment::{FragmentMetadata, TileLocation};
use tilestore::reader::{AttributeBufferMut, QueryBuffers, ReadStatus, Reader};
use tilestore::schema::domain::{tile_coords_of, tile_extent_cells, unravel_index};
use tilestore::schema::{ArraySchema, AttributeId};
use tilestore::storage::store::MemoryStore;
use tilestore::storage::WritableStorageTraits;

/// The values of one attribute over a fragment region or tile.
pub enum AttrData {
    Int32(Vec<i32>),
    VarChar(Vec<String>),
}

/// Write a dense fragment into `store` and return its metadata.
///
/// `region` is the inclusive `[lo, hi]` region the fragment writes;
/// `attr_data` holds per-attribute values in row-major order over the
/// region. Physical tiles span the full tile capacity of the array tiling;
/// cells outside the region are padded.
pub fn dense_fragment(
    store: &MemoryStore,
    schema: &ArraySchema,
    name: &str,
    region: &[i32],
    attr_data: &[(&str, AttrData)],
) -> Arc<FragmentMetadata> {
    let mut fragment = FragmentMetadata::new_dense::<i32>(name, schema, region).unwrap();
    let bounds = schema.domain().bounds::<i32>().unwrap();
    let extents = schema.domain().tile_extents::<i32>().unwrap();
    let tile_shape: Vec<u64> = extents.iter().map(|e| tile_extent_cells(*e)).collect();
    let capacity: u64 = tile_shape.iter().product();
    let lows: Vec<i32> = region.chunks_exact(2).map(|b| b[0]).collect();
    let highs: Vec<i32> = region.chunks_exact(2).map(|b| b[1]).collect();
    let t_lo = tile_coords_of(&lows, &bounds, &extents);
    let t_hi = tile_coords_of(&highs, &bounds, &extents);
    let t_shape: Vec<u64> = std::iter::zip(&t_hi, &t_lo).map(|(h, l)| h - l + 1).collect();
    let tile_num: u64 = t_shape.iter().product();
    let region_shape: Vec<u64> = region
        .chunks_exact(2)
        .map(|b| u64::try_from(b[1] - b[0] + 1).unwrap())
        .collect();

    // The index of a cell in the caller's row-major region values.
    let region_index = |coords: &[i32]| -> Option<usize> {
        let mut index: u64 = 0;
        for (d, c) in coords.iter().enumerate() {
            if *c < region[2 * d] || *c > region[2 * d + 1] {
                return None;
            }
            index = index * region_shape[d] + c.offset_from(region[2 * d]);
        }
        Some(usize::try_from(index).unwrap())
    };
    let tile_cell_coords = |t: u64, p: u64| -> Vec<i32> {
        let tc_rel = unravel_index(t, &t_shape, schema.tile_order());
        let rel = unravel_index(p, &tile_shape, schema.cell_order());
        (0..tile_shape.len())
            .map(|d| bounds[2 * d].add_offset((t_lo[d] + tc_rel[d]) * tile_shape[d] + rel[d]))
            .collect()
    };

    for (attr_name, data) in attr_data {
        let attr_id = schema.attribute_id(attr_name).unwrap();
        let mut file: Vec<u8> = Vec::new();
        let mut var_file: Vec<u8> = Vec::new();
        let mut locations = Vec::new();
        let mut var_locations = Vec::new();
        for t in 0..tile_num {
            let file_start = file.len() as u64;
            let var_start = var_file.len() as u64;
            match data {
                AttrData::Int32(values) => {
                    let mut cells: Vec<i32> = Vec::with_capacity(capacity as usize);
                    for p in 0..capacity {
                        let coords = tile_cell_coords(t, p);
                        cells.push(region_index(&coords).map_or(0, |i| values[i]));
                    }
                    file.extend_from_slice(transmute_to_bytes(&cells));
                }
                AttrData::VarChar(values) => {
                    let mut offsets: Vec<u64> = Vec::with_capacity(capacity as usize);
                    let mut bytes: Vec<u8> = Vec::new();
                    for p in 0..capacity {
                        let coords = tile_cell_coords(t, p);
                        offsets.push(bytes.len() as u64);
                        if let Some(i) = region_index(&coords) {
                            bytes.extend_from_slice(values[i].as_bytes());
                        }
                    }
                    file.extend_from_slice(transmute_to_bytes(&offsets));
                    var_file.extend_from_slice(&bytes);
                    var_locations.push(TileLocation {
                        offset: var_start,
                        size: var_file.len() as u64 - var_start,
                    });
                }
            }
            locations.push(TileLocation {
                offset: file_start,
                size: file.len() as u64 - file_start,
            });
        }
        store.set(&fragment.attribute_key(attr_id), &file).unwrap();
        fragment.set_attribute_tiles(attr_id, locations).unwrap();
        if !var_locations.is_empty() {
            store
                .set(&fragment.attribute_var_key(attr_id), &var_file)
                .unwrap();
            fragment
                .set_attribute_var_tiles(attr_id, var_locations)
                .unwrap();
        }
    }
    Arc::new(fragment)
}

/// One tile of a sparse fragment: its cell coordinates and, per attribute
/// name passed to [`sparse_fragment`], its cell values in coordinate order.
pub struct SparseTile<T> {
    pub coords: Vec<Vec<T>>,
    pub attrs: Vec<AttrData>,
}

/// Write a sparse fragment into `store` and return its metadata.
pub fn sparse_fragment<T: Coordinate>(
    store: &MemoryStore,
    schema: &ArraySchema,
    name: &str,
    attr_names: &[&str],
    tiles: &[SparseTile<T>],
) -> Arc<FragmentMetadata> {
    let dim_num = schema.dim_num();
    let mut mbrs: Vec<T> = Vec::new();
    let mut cell_nums = Vec::new();
    for tile in tiles {
        for d in 0..dim_num {
            let mut lo = tile.coords[0][d];
            let mut hi = lo;
            for cell in &tile.coords {
                if cell[d] < lo {
                    lo = cell[d];
                }
                if cell[d] > hi {
                    hi = cell[d];
                }
            }
            mbrs.push(lo);
            mbrs.push(hi);
        }
        cell_nums.push(tile.coords.len() as u64);
    }
    let mut fragment = FragmentMetadata::new_sparse::<T>(name, schema, &mbrs, cell_nums).unwrap();

    let mut file: Vec<u8> = Vec::new();
    let mut locations = Vec::new();
    for tile in tiles {
        let start = file.len() as u64;
        let flat: Vec<T> = tile.coords.iter().flat_map(|c| c.iter().copied()).collect();
        file.extend_from_slice(transmute_to_bytes(&flat));
        locations.push(TileLocation {
            offset: start,
            size: file.len() as u64 - start,
        });
    }
    store
        .set(&fragment.attribute_key(AttributeId::COORDS), &file)
        .unwrap();
    fragment
        .set_attribute_tiles(AttributeId::COORDS, locations)
        .unwrap();

    for (j, attr_name) in attr_names.iter().enumerate() {
        let attr_id = schema.attribute_id(attr_name).unwrap();
        let mut file: Vec<u8> = Vec::new();
        let mut var_file: Vec<u8> = Vec::new();
        let mut locations = Vec::new();
        let mut var_locations = Vec::new();
        for tile in tiles {
            let start = file.len() as u64;
            let var_start = var_file.len() as u64;
            match &tile.attrs[j] {
                AttrData::Int32(values) => {
                    file.extend_from_slice(transmute_to_bytes(values));
                }
                AttrData::VarChar(values) => {
                    let mut offsets: Vec<u64> = Vec::with_capacity(values.len());
                    let mut bytes: Vec<u8> = Vec::new();
                    for value in values {
                        offsets.push(bytes.len() as u64);
                        bytes.extend_from_slice(value.as_bytes());
                    }
                    file.extend_from_slice(transmute_to_bytes(&offsets));
                    var_file.extend_from_slice(&bytes);
                    var_locations.push(TileLocation {
                        offset: var_start,
                        size: var_file.len() as u64 - var_start,
                    });
                }
            }
            locations.push(TileLocation {
                offset: start,
                size: file.len() as u64 - start,
            });
        }
        store.set(&fragment.attribute_key(attr_id), &file).unwrap();
        fragment.set_attribute_tiles(attr_id, locations).unwrap();
        if !var_locations.is_empty() {
            store
                .set(&fragment.attribute_var_key(attr_id), &var_file)
                .unwrap();
            fragment
                .set_attribute_var_tiles(attr_id, var_locations)
                .unwrap();
        }
    }
    Arc::new(fragment)
}

/// Drain a single-attribute `i32` query, allocating `buffer_bytes` per
/// call, and return the concatenated values.
pub fn drain_i32(reader: &mut Reader<MemoryStore>, buffer_bytes: usize) -> Vec<i32> {
    let mut out = Vec::new();
    while !reader.done() {
        let mut buffer = vec![0u8; buffer_bytes];
        let mut buffers = QueryBuffers::new(vec![AttributeBufferMut::new(&mut buffer)]);
        let status = reader.read(&mut buffers).unwrap();
        assert_eq!(status, ReadStatus::Completed);
        let written = usize::try_from(buffers.sizes()[0].buffer_size).unwrap();
        out.extend_from_slice(&convert_from_bytes_slice::<i32>(&buffer[..written]));
    }
    out
}
