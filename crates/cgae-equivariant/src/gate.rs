//! Gated nonlinear block.
//!
//! ```text
//! features ──► Convolution ──► [ scalars | gates | non-scalars ]
//!                                  │         │         │
//!                            scalar_act  gate_act      │
//!                                  │         └────► ⊙ ◄┘  (one gate per copy)
//!                                  ▼                ▼
//!                      output in the order of rs_out
//! ```

use std::sync::Arc;

use burn::module::Ignored;
use burn::prelude::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use cgae_core::{Result, Signature};

use crate::activation::Activation;
use crate::convolution::{Convolution, PairGeometry};
use crate::radial::RadialConfig;

#[derive(Module, Debug)]
pub struct GatedBlock<B: Backend> {
    conv: Convolution<B>,
    scalar_activation: Ignored<Activation>,
    gate_activation: Ignored<Activation>,
    rs_out: Ignored<Arc<Signature>>,
}

impl<B: Backend> GatedBlock<B> {
    pub fn new(
        rs_in: Arc<Signature>,
        rs_out: Arc<Signature>,
        scalar_activation: Activation,
        gate_activation: Activation,
        radial: &RadialConfig,
        device: &B::Device,
    ) -> Result<Self> {
        let scalars = rs_out.num_scalars();
        let gates = rs_out.num_nonscalars();
        let intermediate = Signature::new(
            [(scalars, 0), (gates, 0)]
                .into_iter()
                .filter(|&(mul, _)| mul > 0)
                .chain(rs_out.nonscalars().map(|ir| (ir.mul, ir.degree))),
        )?;

        Ok(Self {
            conv: Convolution::new(rs_in, Arc::new(intermediate), radial, device),
            scalar_activation: Ignored(scalar_activation),
            gate_activation: Ignored(gate_activation),
            rs_out: Ignored(rs_out),
        })
    }

    pub fn rs_in(&self) -> &Arc<Signature> {
        self.conv.rs_in()
    }

    pub fn rs_out(&self) -> &Arc<Signature> {
        &self.rs_out
    }

    pub fn forward(&self, features: Tensor<B, 3>, geometry: &PairGeometry) -> Tensor<B, 3> {
        let y = self.conv.forward(features, geometry);
        let [batch, n, _] = y.dims();
        let num_scalars = self.rs_out.num_scalars();
        let num_gates = self.rs_out.num_nonscalars();

        let scalars = (num_scalars > 0)
            .then(|| self.scalar_activation.apply(y.clone().narrow(2, 0, num_scalars)));
        let gates = (num_gates > 0)
            .then(|| self.gate_activation.apply(y.clone().narrow(2, num_scalars, num_gates)));

        let mut scalar_cursor = 0;
        let mut gate_cursor = 0;
        let mut offset = num_scalars + num_gates;
        let mut blocks = Vec::with_capacity(self.rs_out.irreps().len());

        for ir in self.rs_out.irreps() {
            if ir.degree == 0 {
                if let Some(scalars) = &scalars {
                    blocks.push(scalars.clone().narrow(2, scalar_cursor, ir.mul));
                }
                scalar_cursor += ir.mul;
                continue;
            }
            let Some(gates) = &gates else { continue };
            let order = ir.order();
            let gate = gates
                .clone()
                .narrow(2, gate_cursor, ir.mul)
                .reshape([batch, n, ir.mul, 1])
                .repeat_dim(3, order);
            let block = y
                .clone()
                .narrow(2, offset, ir.dim())
                .reshape([batch, n, ir.mul, order]);
            blocks.push((block * gate).reshape([batch, n, ir.dim()]));
            gate_cursor += ir.mul;
            offset += ir.dim();
        }

        Tensor::cat(blocks, 2)
    }
}
