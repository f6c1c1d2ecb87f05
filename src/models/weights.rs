//! SafeTensors weight loading and saving.
//!
//! Weight files map tensor name → flattened f32 data plus a shape table;
//! names are written sorted so snapshots are byte-stable.

use crate::error::{DistilarError, Result};
use safetensors::tensor::{Dtype, TensorView};
use std::collections::HashMap;
use std::path::Path;

/// Load a SafeTensors file into `(weights, shapes)` maps.
pub fn load_safetensors(path: &Path) -> Result<(HashMap<String, Vec<f32>>, HashMap<String, Vec<usize>>)> {
    if !path.exists() {
        return Err(DistilarError::ModelNotFound { path: path.to_path_buf() });
    }
    let data = std::fs::read(path)
        .map_err(|e| DistilarError::io(format!("reading SafeTensors file {}", path.display()), e))?;

    let tensors = safetensors::SafeTensors::deserialize(&data).map_err(|e| {
        DistilarError::MalformedCheckpoint { path: path.to_path_buf(), message: e.to_string() }
    })?;

    let mut weights = HashMap::new();
    let mut shapes = HashMap::new();

    for name in tensors.names() {
        let tensor = tensors.tensor(name).map_err(|e| DistilarError::MalformedCheckpoint {
            path: path.to_path_buf(),
            message: format!("failed to read tensor '{name}': {e}"),
        })?;

        if tensor.dtype() != Dtype::F32 {
            return Err(DistilarError::MalformedCheckpoint {
                path: path.to_path_buf(),
                message: format!("tensor '{name}' has dtype {:?}, expected F32", tensor.dtype()),
            });
        }

        weights.insert(name.to_string(), bytemuck::cast_slice(tensor.data()).to_vec());
        shapes.insert(name.to_string(), tensor.shape().to_vec());
    }

    Ok((weights, shapes))
}

/// Save named weights as a SafeTensors file, sorted by name.
pub fn save_safetensors(
    entries: &[(String, Vec<f32>, Vec<usize>)],
    path: &Path,
) -> Result<()> {
    let mut sorted: Vec<&(String, Vec<f32>, Vec<usize>)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let byte_buffers: Vec<Vec<u8>> =
        sorted.iter().map(|(_, data, _)| bytemuck::cast_slice(data).to_vec()).collect();

    let views: Vec<(&str, TensorView)> = sorted
        .iter()
        .zip(byte_buffers.iter())
        .map(|((name, _, shape), bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| DistilarError::MalformedCheckpoint {
                    path: path.to_path_buf(),
                    message: format!("cannot build tensor view '{name}': {e}"),
                })
        })
        .collect::<Result<_>>()?;

    let bytes = safetensors::serialize(views, None).map_err(|e| {
        DistilarError::MalformedCheckpoint { path: path.to_path_buf(), message: e.to_string() }
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DistilarError::io(format!("creating {}", parent.display()), e))?;
    }
    std::fs::write(path, bytes)
        .map_err(|e| DistilarError::io(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        let entries = vec![
            ("b.weight".to_string(), vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]),
            ("a.weight".to_string(), vec![0.5; 6], vec![2, 3]),
        ];
        save_safetensors(&entries, &path).unwrap();

        let (weights, shapes) = load_safetensors(&path).unwrap();
        assert_eq!(weights["b.weight"], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(shapes["a.weight"], vec![2, 3]);
    }

    #[test]
    fn test_missing_file_is_model_not_found() {
        let err = load_safetensors(Path::new("/nonexistent/model.safetensors")).unwrap_err();
        assert!(matches!(err, DistilarError::ModelNotFound { .. }));
    }

    #[test]
    fn test_garbage_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();
        assert!(matches!(
            load_safetensors(&path),
            Err(DistilarError::MalformedCheckpoint { .. })
        ));
    }
}
