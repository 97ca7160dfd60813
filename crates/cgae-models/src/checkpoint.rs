//! SafeTensors persistence for the dense autoencoder.
//!
//! | Name | Shape | Dtype |
//! |------|-------|-------|
//! | `encoder.weight` | \[atoms, sites\] | F32 |
//! | `decoder.weight` | \[sites, atoms\] | F32 |

use std::collections::HashMap;
use std::path::Path;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use cgae_core::{CgError, Result};

use crate::dense::{DenseDecoder, DenseEncoder};

pub const ENCODER_KEY: &str = "encoder.weight";
pub const DECODER_KEY: &str = "decoder.weight";

/// Read an F32 tensor of the given rank. Errors are plain messages so callers
/// can wrap them in the variant that fits (checkpoint or dataset).
pub fn read_f32(
    tensors: &SafeTensors<'_>,
    name: &str,
    rank: usize,
) -> std::result::Result<(Vec<usize>, Vec<f32>), String> {
    let view = tensors
        .tensor(name)
        .map_err(|_| format!("missing '{name}' tensor"))?;
    if view.dtype() != Dtype::F32 {
        return Err(format!("'{name}': expected F32 dtype, got {:?}", view.dtype()));
    }
    let shape = view.shape().to_vec();
    if shape.len() != rank {
        return Err(format!("'{name}': expected rank {rank}, got shape {shape:?}"));
    }
    // The byte buffer is not guaranteed to be 4-byte aligned.
    let values: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
    Ok((shape, values))
}

/// Serialize named F32 tensors into a SafeTensors byte buffer.
pub fn write_f32(tensors: &[(&str, Vec<usize>, &[f32])]) -> std::result::Result<Vec<u8>, String> {
    let views = tensors
        .iter()
        .map(|(name, shape, values)| {
            TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice::<f32, u8>(values))
                .map(|view| (name.to_string(), view))
                .map_err(|e| format!("'{name}': {e}"))
        })
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    safetensors::serialize(views, &None).map_err(|e| e.to_string())
}

/// Pretrained dense autoencoder weights.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseCheckpoint {
    atoms: usize,
    sites: usize,
    encoder: Vec<f32>,
    decoder: Vec<f32>,
}

impl DenseCheckpoint {
    /// `encoder` is `[atoms, sites]`, `decoder` is `[sites, atoms]`, both row-major.
    pub fn new(atoms: usize, sites: usize, encoder: Vec<f32>, decoder: Vec<f32>) -> Result<Self> {
        if atoms == 0 {
            return Err(CgError::EmptySystem { what: "atom" });
        }
        if sites == 0 {
            return Err(CgError::EmptySystem { what: "site" });
        }
        if encoder.len() != atoms * sites {
            return Err(CgError::shape(ENCODER_KEY, &[atoms, sites], &[encoder.len()]));
        }
        if decoder.len() != atoms * sites {
            return Err(CgError::shape(DECODER_KEY, &[sites, atoms], &[decoder.len()]));
        }
        Ok(Self {
            atoms,
            sites,
            encoder,
            decoder,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
            .map_err(|e| CgError::Checkpoint(format!("{}: {e}", path.display())))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tensors = SafeTensors::deserialize(bytes)
            .map_err(|e| CgError::Checkpoint(format!("not a SafeTensors file: {e}")))?;
        let (enc_shape, encoder) = read_f32(&tensors, ENCODER_KEY, 2).map_err(CgError::Checkpoint)?;
        let (dec_shape, decoder) = read_f32(&tensors, DECODER_KEY, 2).map_err(CgError::Checkpoint)?;
        let (atoms, sites) = (enc_shape[0], enc_shape[1]);
        if dec_shape != [sites, atoms] {
            return Err(CgError::Checkpoint(format!(
                "'{DECODER_KEY}' has shape {dec_shape:?}, expected [{sites}, {atoms}] to match '{ENCODER_KEY}'"
            )));
        }
        Self::new(atoms, sites, encoder, decoder)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        write_f32(&[
            (ENCODER_KEY, vec![self.atoms, self.sites], self.encoder.as_slice()),
            (DECODER_KEY, vec![self.sites, self.atoms], self.decoder.as_slice()),
        ])
        .map_err(CgError::Checkpoint)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub const fn atoms(&self) -> usize {
        self.atoms
    }

    pub const fn sites(&self) -> usize {
        self.sites
    }

    /// Snapshot the weights of live models.
    pub fn from_models<B: Backend>(encoder: &DenseEncoder<B>, decoder: &DenseDecoder<B>) -> Result<Self> {
        let to_vec = |t: Tensor<B, 2>| {
            t.into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| CgError::TensorData(format!("{e:?}")))
        };
        Self::new(
            encoder.atoms(),
            encoder.sites(),
            to_vec(encoder.logits())?,
            to_vec(decoder.weight())?,
        )
    }

    pub fn into_models<B: Backend>(self, device: &B::Device) -> (DenseEncoder<B>, DenseDecoder<B>) {
        let encoder = Tensor::from_data(TensorData::new(self.encoder, [self.atoms, self.sites]), device);
        let decoder = Tensor::from_data(TensorData::new(self.decoder, [self.sites, self.atoms]), device);
        (
            DenseEncoder::from_weight(encoder),
            DenseDecoder::from_weight(decoder),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_bytes_round_trip_into_models() {
        let checkpoint =
            DenseCheckpoint::new(3, 2, vec![1.0, 0.0, 0.0, 1.0, 0.5, 0.5], vec![0.1; 6]).unwrap();
        let restored = DenseCheckpoint::from_bytes(&checkpoint.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, checkpoint);

        let (encoder, decoder) = restored.into_models::<NdArray<f32>>(&Default::default());
        assert_eq!((encoder.atoms(), encoder.sites()), (3, 2));
        assert_eq!(decoder.weight().dims(), [2, 3]);
    }

    #[test]
    fn test_mismatched_decoder_rejected() {
        let bytes = write_f32(&[
            (ENCODER_KEY, vec![3, 2], &[0.0f32; 6][..]),
            (DECODER_KEY, vec![3, 2], &[0.0f32; 6][..]),
        ])
        .unwrap();
        let err = DenseCheckpoint::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CgError::Checkpoint(msg) if msg.contains("decoder.weight")));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            DenseCheckpoint::from_bytes(b"not safetensors"),
            Err(CgError::Checkpoint(_))
        ));
    }
}
