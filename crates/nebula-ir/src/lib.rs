//! Mesh document model for the nebula ray-intersection kernel.
//!
//! A geometry document is a list of meshes, each a list of mesh parts, each
//! a flat vertex array (`[x0, y0, z0, x1, ...]`) and a flat triangle index
//! array (`[i0, i1, i2, ...]`):
//!
//! ```json
//! { "geometry": [ { "meshParts": [ { "vertices": [0,0,0, 1,0,0, 0,1,0], "indices": [0,1,2] } ] } ] }
//! ```
//!
//! Parsing is lenient at every level. Anything missing or of the wrong
//! shape reads as empty, so a malformed document produces degenerate
//! geometry instead of an error. Only a JSON syntax error is reported, and
//! [`GeometryDocument::from_json_lenient`] folds even that into an empty
//! document.

#![warn(missing_docs)]

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while reading a geometry document.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// The text is not valid JSON.
    #[error("invalid geometry document: {0}")]
    Syntax(#[from] serde_json::Error),
}

/// Root of a geometry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryDocument {
    /// Meshes in the document.
    #[serde(default, deserialize_with = "lenient_seq")]
    pub geometry: Vec<Mesh>,
}

/// A mesh made of independent parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Parts of this mesh; each becomes one accelerator geometry.
    #[serde(rename = "meshParts", default, deserialize_with = "lenient_seq")]
    pub mesh_parts: Vec<MeshPart>,
}

/// Flat vertex and index arrays for one triangle mesh part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshPart {
    /// Flat array of vertex positions: `[x0, y0, z0, x1, y1, z1, ...]`.
    #[serde(default, deserialize_with = "lenient_floats")]
    pub vertices: Vec<f32>,
    /// Flat array of triangle indices: `[i0, i1, i2, ...]`.
    #[serde(default, deserialize_with = "lenient_indices")]
    pub indices: Vec<u32>,
}

impl MeshPart {
    /// Create a part from flat arrays.
    pub fn new(vertices: Vec<f32>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Number of whole vertices (trailing partial triples are ignored).
    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Number of whole triangles (trailing partial triples are ignored).
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }
}

impl GeometryDocument {
    /// Document with a single mesh holding a single part.
    pub fn single_part(vertices: Vec<f32>, indices: Vec<u32>) -> Self {
        Self {
            geometry: vec![Mesh {
                mesh_parts: vec![MeshPart::new(vertices, indices)],
            }],
        }
    }

    /// Parse a document, reporting JSON syntax errors.
    ///
    /// A syntactically valid document of the wrong shape (for example a
    /// bare array) is read as empty.
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(json)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// Parse a document, reading invalid JSON as an empty document.
    pub fn from_json_lenient(json: &str) -> Self {
        Self::from_json(json).unwrap_or_default()
    }

    /// Serialize back to JSON.
    pub fn to_json(&self) -> String {
        // Plain numeric vectors always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// All parts of all meshes, in document order.
    pub fn parts(&self) -> impl Iterator<Item = &MeshPart> {
        self.geometry.iter().flat_map(|m| m.mesh_parts.iter())
    }

    /// Total number of parts across all meshes.
    pub fn num_parts(&self) -> usize {
        self.parts().count()
    }

    /// Total number of whole triangles across all parts.
    pub fn num_triangles(&self) -> usize {
        self.parts().map(MeshPart::num_triangles).sum()
    }

    /// Total number of whole vertices across all parts.
    pub fn num_vertices(&self) -> usize {
        self.parts().map(MeshPart::num_vertices).sum()
    }
}

fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_numbers<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect(),
        _ => Vec::new(),
    })
}

fn lenient_floats<'de, D>(deserializer: D) -> Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_numbers(deserializer)?
        .into_iter()
        .map(|n| n as f32)
        .collect())
}

fn lenient_indices<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    // `as` saturates, so negative or huge indices clamp instead of wrapping.
    Ok(lenient_numbers(deserializer)?
        .into_iter()
        .map(|n| n as u32)
        .collect())
}
