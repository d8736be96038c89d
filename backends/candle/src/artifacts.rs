use crate::models::ModelDescription;
use candle::{Device, Result, Tensor};
use candle_nn::VarMap;
use std::collections::HashMap;
use std::path::Path;

/// Weights and architecture in a single safetensors file
pub const COMBINED_FILE: &str = "cnn_model_dssm.safetensors";
/// Architecture description only
pub const ARCHITECTURE_FILE: &str = "cnn_dssm_model_only.json";
/// Weights only
pub const WEIGHTS_FILE: &str = "cnn_dssm_model_weights.safetensors";
/// Safetensors metadata key holding the architecture JSON in the combined file
pub const ARCHITECTURE_KEY: &str = "architecture";

/// Snapshot of every variable, sorted by name
pub(crate) fn named_tensors(varmap: &VarMap) -> Result<Vec<(String, Tensor)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle::Error::Msg("variable map lock is poisoned".to_string()))?;
    let mut tensors: Vec<(String, Tensor)> = data
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect();
    tensors.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(tensors)
}

pub(crate) fn write_weights(varmap: &VarMap, path: &Path) -> Result<()> {
    varmap.save(path)
}

pub(crate) fn write_architecture(description: &ModelDescription, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(description)
        .map_err(|err| candle::Error::Msg(err.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

pub(crate) fn write_combined(
    varmap: &VarMap,
    description: &ModelDescription,
    path: &Path,
) -> Result<()> {
    let json =
        serde_json::to_string(description).map_err(|err| candle::Error::Msg(err.to_string()))?;
    let metadata = HashMap::from([(ARCHITECTURE_KEY.to_string(), json)]);
    let tensors = named_tensors(varmap)?;
    safetensors::serialize_to_file(tensors, &Some(metadata), path)
        .map_err(|err| candle::Error::Msg(err.to_string()))
}

pub fn read_architecture(path: &Path) -> Result<ModelDescription> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|err| {
        candle::Error::Msg(format!(
            "{} is not a valid architecture description: {err}",
            path.display()
        ))
    })
}

/// Architecture description and tensors stored in a combined artifact
pub fn read_combined(path: &Path, device: &Device) -> Result<(ModelDescription, HashMap<String, Tensor>)> {
    let buffer = std::fs::read(path)?;
    let (_, metadata) = safetensors::SafeTensors::read_metadata(&buffer)
        .map_err(|err| candle::Error::Msg(err.to_string()))?;
    let json = match metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(ARCHITECTURE_KEY))
    {
        Some(json) => json,
        None => candle::bail!(
            "{} has no `{ARCHITECTURE_KEY}` metadata entry",
            path.display()
        ),
    };
    let description: ModelDescription =
        serde_json::from_str(json).map_err(|err| candle::Error::Msg(err.to_string()))?;
    let tensors = candle::safetensors::load_buffer(&buffer, device)?;
    Ok((description, tensors))
}

/// Overwrite every variable in place with the tensor of the same name.
///
/// Missing names, unknown names and shape mismatches are all errors.
pub(crate) fn restore_weights(varmap: &VarMap, mut tensors: HashMap<String, Tensor>) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle::Error::Msg("variable map lock is poisoned".to_string()))?;
    for (name, var) in data.iter() {
        let value = match tensors.remove(name) {
            Some(value) => value,
            None => candle::bail!("weights are missing variable `{name}`"),
        };
        if value.dims() != var.dims() {
            candle::bail!(
                "variable `{name}` has shape {:?} but the stored tensor is {:?}",
                var.dims(),
                value.dims()
            );
        }
        var.set(&value.to_dtype(var.dtype())?.to_device(var.device())?)?;
    }
    if let Some(name) = tensors.keys().next() {
        candle::bail!("weights contain unexpected variable `{name}`");
    }
    Ok(())
}
