//! SPDZ-style two-party computation over shared tensors
//!
//! The context drives both parties from the client: every share-side
//! operation becomes a remote tensor command against a party's pointer,
//! so shares never leave their worker except through explicit reveals.
//! The client doubles as the crypto provider and deals Beaver triples.

use crate::error::{GridError, Result};
use crate::mpc::{fixed, share};
use crate::protocol::CommandArg;
use crate::tensor::{GridTensor, RawTensor, RemoteRef, Scalar};
use crate::worker::{Worker, WorkerId};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The two computation parties of a sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Alice,
    Bob,
}

/// Operand of a share-side remote command.
enum OpArg<'a> {
    Ref(&'a RemoteRef),
    Int(i64),
}

/// Client-side orchestrator for two-party SPDZ arithmetic.
pub struct SpdzContext {
    client: Arc<Worker>,
    alice: WorkerId,
    bob: WorkerId,
    precision_fractional: u32,
    modulus: i64,
}

impl SpdzContext {
    pub fn new(client: Arc<Worker>, alice: impl Into<WorkerId>, bob: impl Into<WorkerId>) -> Self {
        Self {
            client,
            alice: alice.into(),
            bob: bob.into(),
            precision_fractional: fixed::PRECISION_FRACTIONAL,
            modulus: fixed::Q,
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision_fractional
    }

    /// The role a worker plays in this computation.
    pub fn get_party(&self, worker: &str) -> Result<Party> {
        if worker == self.alice {
            Ok(Party::Alice)
        } else if worker == self.bob {
            Ok(Party::Bob)
        } else {
            Err(GridError::UnknownWorker(worker.to_string()))
        }
    }

    /// The pointer held by one party of a sharing.
    pub fn party_of(&self, t: &GridTensor, party: Party) -> Result<GridTensor> {
        let (a, b) = self.share_refs(t)?;
        let remote = match party {
            Party::Alice => a,
            Party::Bob => b,
        };
        Ok(GridTensor::pointer(remote, self.client.id()))
    }

    // ---- sharing and revealing -------------------------------------------

    /// Encode a plaintext into the field, split it and deal the shares out.
    /// Floats are fixed-point encoded; longs are reduced into the field as-is.
    pub fn share_secret(&self, plain: &RawTensor) -> Result<GridTensor> {
        let field = match plain {
            RawTensor::Float(_) => fixed::encode(plain, self.precision_fractional)?,
            RawTensor::Long(_) => plain.mod_scalar(Scalar::Int(self.modulus))?,
        };
        self.share_field(&field)
    }

    /// Split an already field-resident tensor and deal the shares out.
    fn share_field(&self, field: &RawTensor) -> Result<GridTensor> {
        let (first, second) = share::share(field, self.modulus)?;
        self.distribute(first, second, field.shape())
    }

    /// Place one raw share on each party and assemble the shared handle.
    fn distribute(
        &self,
        alice_share: RawTensor,
        bob_share: RawTensor,
        shape: (usize, usize),
    ) -> Result<GridTensor> {
        let a = self.client.send_raw(alice_share, &self.alice)?;
        let b = self.client.send_raw(bob_share, &self.bob)?;
        Ok(self.assemble(a, b, shape))
    }

    /// Pull both shares back and sum them into the field plaintext. The
    /// parties hand their shares over, consuming the sharing.
    pub fn reconstruct(&self, t: &GridTensor) -> Result<RawTensor> {
        let (a, b) = self.share_refs(t)?;
        let (_, a_raw) = self.client.request_raw(&a.location, a.id_at_location)?;
        let (_, b_raw) = self.client.request_raw(&b.location, b.id_at_location)?;
        share::reconstruct(&[a_raw, b_raw], self.modulus)
    }

    /// Reconstruct and decode back into floats.
    pub fn reveal(&self, t: &GridTensor) -> Result<RawTensor> {
        fixed::decode(&self.reconstruct(t)?, self.precision_fractional)
    }

    /// Re-deal a sharing with each party holding the other's old share.
    /// The reconstructed value is unchanged; addition commutes.
    pub fn swap_shares(&self, t: &GridTensor) -> Result<GridTensor> {
        let shape = t.share_shape()?;
        let (a, b) = self.share_refs(t)?;
        let (_, a_raw) = self.client.request_raw(&a.location, a.id_at_location)?;
        let (_, b_raw) = self.client.request_raw(&b.location, b.id_at_location)?;
        self.distribute(b_raw, a_raw, shape)
    }

    // ---- linear operations -----------------------------------------------

    /// Elementwise share addition.
    pub fn add(&self, x: &GridTensor, y: &GridTensor) -> Result<GridTensor> {
        self.zip_parties("__add__", x, y)
    }

    /// Elementwise share subtraction.
    pub fn sub(&self, x: &GridTensor, y: &GridTensor) -> Result<GridTensor> {
        self.zip_parties("__sub__", x, y)
    }

    /// Apply one elementwise operator share-by-share on both parties.
    fn zip_parties(&self, op: &str, x: &GridTensor, y: &GridTensor) -> Result<GridTensor> {
        let shape = x.share_shape()?;
        if y.share_shape()? != shape {
            return Err(GridError::DimensionMismatch {
                left: shape,
                right: y.share_shape()?,
            });
        }
        let (xa, xb) = self.share_refs(x)?;
        let (ya, yb) = self.share_refs(y)?;
        let za = self.modded(op, &xa, OpArg::Ref(&ya))?;
        let zb = self.modded(op, &xb, OpArg::Ref(&yb))?;
        Ok(self.assemble(za, zb, shape))
    }

    /// Negation: each share becomes its modular complement.
    pub fn neg(&self, x: &GridTensor) -> Result<GridTensor> {
        let (a, b) = self.share_refs(x)?;
        let za = self.modded("__rsub__", &a, OpArg::Int(self.modulus))?;
        let zb = self.modded("__rsub__", &b, OpArg::Int(self.modulus))?;
        Ok(self.assemble(za, zb, x.share_shape()?))
    }

    /// Add a public field-encoded tensor to a sharing. Only one party
    /// absorbs the public value; the other gets a fresh zero touch so both
    /// handles point at new objects.
    pub fn public_add(&self, x: &GridTensor, public: &RawTensor) -> Result<GridTensor> {
        let shape = x.share_shape()?;
        if public.shape() != shape {
            return Err(GridError::DimensionMismatch {
                left: shape,
                right: public.shape(),
            });
        }
        let (a, b) = self.share_refs(x)?;
        let p = self.client.send_raw(public.clone(), &self.alice)?;
        let za = self.modded("__add__", &a, OpArg::Ref(&p))?;
        let zb = self.modded("__add__", &b, OpArg::Int(0))?;
        self.release(&p)?;
        Ok(self.assemble(za, zb, shape))
    }

    /// Multiply a sharing by a public field-encoded tensor, elementwise,
    /// rescaling the fixed-point product.
    pub fn public_mul(&self, x: &GridTensor, public: &RawTensor) -> Result<GridTensor> {
        let shape = x.share_shape()?;
        if public.shape() != shape {
            return Err(GridError::DimensionMismatch {
                left: shape,
                right: public.shape(),
            });
        }
        let (a, b) = self.share_refs(x)?;
        let (pa, pb) = self.broadcast(public)?;
        let za = self.modded("__mul__", &a, OpArg::Ref(&pa))?;
        let zb = self.modded("__mul__", &b, OpArg::Ref(&pb))?;
        self.release(&pa)?;
        self.release(&pb)?;
        let z = self.assemble(za, zb, shape);
        let out = self.truncate(&z, self.precision_fractional)?;
        self.release_sharing(&z)?;
        Ok(out)
    }

    // ---- multiplication ----------------------------------------------------

    /// Elementwise share multiplication via a Beaver triple, rescaled to
    /// the working precision.
    pub fn mul(&self, x: &GridTensor, y: &GridTensor) -> Result<GridTensor> {
        let shape = x.share_shape()?;
        if y.share_shape()? != shape {
            return Err(GridError::DimensionMismatch {
                left: shape,
                right: y.share_shape()?,
            });
        }
        let (a, b, c) = self.mul_triple(shape)?;

        // blind the inputs and reveal the differences
        let delta = self.reconstruct(&self.sub(x, &a)?)?;
        let epsilon = self.reconstruct(&self.sub(y, &b)?)?;
        debug!("spdz mul: blinding factors revealed for shape {shape:?}");

        let (da, db) = self.broadcast(&delta)?;
        let (ea, eb) = self.broadcast(&epsilon)?;
        let (aa, ab) = self.share_refs(&a)?;
        let (ba, bb) = self.share_refs(&b)?;
        let (ca, cb) = self.share_refs(&c)?;

        // z_p = c_p + delta*b_p + epsilon*a_p
        let za = self.beaver_combine(&ca, &da, &ba, &ea, &aa, false)?;
        let zb = self.beaver_combine(&cb, &db, &bb, &eb, &ab, false)?;
        for spent in [&da, &db, &ea, &eb] {
            self.release(spent)?;
        }
        for spent in [&a, &b, &c] {
            self.release_sharing(spent)?;
        }
        let z = self.assemble(za, zb, shape);

        // the public cross term goes to one party only
        let correction = delta.mul(&epsilon)?.mod_scalar(Scalar::Int(self.modulus))?;
        let corrected = self.public_add(&z, &correction)?;
        self.release_sharing(&z)?;
        let out = self.truncate(&corrected, self.precision_fractional)?;
        self.release_sharing(&corrected)?;
        Ok(out)
    }

    /// Share matrix product `(m×k)·(k×n)` via a matmul Beaver triple,
    /// rescaled and re-randomized with a fresh zero sharing.
    pub fn matmul(&self, x: &GridTensor, y: &GridTensor) -> Result<GridTensor> {
        let (m, k) = x.share_shape()?;
        let (k2, n) = y.share_shape()?;
        if k != k2 {
            return Err(GridError::DimensionMismatch {
                left: (m, k),
                right: (k2, n),
            });
        }
        let (r, s, t) = self.matmul_triple((m, k), (k, n))?;

        let rho = self.reconstruct(&self.sub(x, &r)?)?;
        let sigma = self.reconstruct(&self.sub(y, &s)?)?;

        let (rho_a, rho_b) = self.broadcast(&rho)?;
        let (sig_a, sig_b) = self.broadcast(&sigma)?;
        let (ra, rb) = self.share_refs(&r)?;
        let (sa, sb) = self.share_refs(&s)?;
        let (ta, tb) = self.share_refs(&t)?;

        // z_p = t_p + r_p·sigma + rho·s_p
        let za = self.beaver_combine(&ta, &ra, &sig_a, &rho_a, &sa, true)?;
        let zb = self.beaver_combine(&tb, &rb, &sig_b, &rho_b, &sb, true)?;
        for spent in [&rho_a, &rho_b, &sig_a, &sig_b] {
            self.release(spent)?;
        }
        for spent in [&r, &s, &t] {
            self.release_sharing(spent)?;
        }
        let z = self.assemble(za, zb, (m, n));

        let correction = rho.matmul(&sigma)?.mod_scalar(Scalar::Int(self.modulus))?;
        let corrected = self.public_add(&z, &correction)?;
        self.release_sharing(&z)?;
        let rescaled = self.truncate(&corrected, self.precision_fractional)?;
        self.release_sharing(&corrected)?;
        let out = self.remask(&rescaled)?;
        self.release_sharing(&rescaled)?;
        Ok(out)
    }

    /// One party's Beaver recombination:
    /// elementwise `base + u*v + w*t`, or `base + u·v + w·t` as matrix
    /// products. All terms are reduced into the field.
    fn beaver_combine(
        &self,
        base: &RemoteRef,
        u: &RemoteRef,
        v: &RemoteRef,
        w: &RemoteRef,
        t: &RemoteRef,
        matrix: bool,
    ) -> Result<RemoteRef> {
        let op = if matrix { "mm" } else { "__mul__" };
        let uv = self.modded(op, u, OpArg::Ref(v))?;
        let wt = self.modded(op, w, OpArg::Ref(t))?;
        let partial = self.modded("__add__", base, OpArg::Ref(&uv))?;
        let combined = self.modded("__add__", &partial, OpArg::Ref(&wt))?;
        for spent in [&uv, &wt, &partial] {
            self.release(spent)?;
        }
        Ok(combined)
    }

    /// Rescale a fixed-point sharing by `BASE^amount`. One party floors
    /// its share down; the other floors the complement, so the
    /// reconstructed quotient is off by at most one field unit. The
    /// complement trick needs shares that wrap the field once, which a
    /// degenerate sharing may not; a fresh zero-share mask restores that.
    pub fn truncate(&self, x: &GridTensor, amount: u32) -> Result<GridTensor> {
        let scale = fixed::scale(amount);
        let masked = self.remask(x)?;
        let (a, b) = self.share_refs(&masked)?;
        let za = self.modded("__floordiv__", &a, OpArg::Int(scale))?;
        // complement is taken without reduction, then floored and flipped back
        let flipped = self.raw("__rsub__", &b, OpArg::Int(self.modulus))?;
        let floored = self.raw("__floordiv__", &flipped, OpArg::Int(scale))?;
        let zb = self.modded("__rsub__", &floored, OpArg::Int(self.modulus))?;
        self.release(&flipped)?;
        self.release(&floored)?;
        self.release_sharing(&masked)?;
        Ok(self.assemble(za, zb, x.share_shape()?))
    }

    /// Approximate the logistic function with the degree-5 polynomial
    /// `1/2 + x/4 - x^3/48 + x^5/480` evaluated over the sharing. The
    /// coefficients travel as sharings, dealt out like triples, and every
    /// term goes through the shared-multiplication primitive.
    pub fn sigmoid(&self, x: &GridTensor) -> Result<GridTensor> {
        let shape = x.share_shape()?;
        let x2 = self.mul(x, x)?;
        let x3 = self.mul(x, &x2)?;
        let x5 = self.mul(&x2, &x3)?;

        let w1 = self.share_secret(&RawTensor::float_fill(shape.0, shape.1, 0.25))?;
        let w3 = self.share_secret(&RawTensor::float_fill(shape.0, shape.1, -1.0 / 48.0))?;
        let w5 = self.share_secret(&RawTensor::float_fill(shape.0, shape.1, 1.0 / 480.0))?;

        let t1 = self.mul(x, &w1)?;
        let t3 = self.mul(&x3, &w3)?;
        let t5 = self.mul(&x5, &w5)?;
        for spent in [&x2, &x3, &x5, &w1, &w3, &w5] {
            self.release_sharing(spent)?;
        }

        let low = self.add(&t1, &t3)?;
        let sum = self.add(&low, &t5)?;
        for spent in [&t1, &t3, &t5, &low] {
            self.release_sharing(spent)?;
        }

        let out = self.public_add(&sum, &self.coefficient(shape, 0.5)?)?;
        self.release_sharing(&sum)?;
        Ok(out)
    }

    fn coefficient(&self, shape: (usize, usize), value: f64) -> Result<RawTensor> {
        fixed::encode(
            &RawTensor::float_fill(shape.0, shape.1, value),
            self.precision_fractional,
        )
    }

    // ---- triples and masking ---------------------------------------------

    /// Deal a Beaver triple `(a, b, a*b)` for elementwise multiplication.
    fn mul_triple(
        &self,
        shape: (usize, usize),
    ) -> Result<(GridTensor, GridTensor, GridTensor)> {
        let a = RawTensor::random_long(shape.0, shape.1, self.modulus);
        let b = RawTensor::random_long(shape.0, shape.1, self.modulus);
        let c = a.mul(&b)?.mod_scalar(Scalar::Int(self.modulus))?;
        Ok((self.share_field(&a)?, self.share_field(&b)?, self.share_field(&c)?))
    }

    /// Deal a Beaver triple `(r, s, r·s)` for the matrix product.
    fn matmul_triple(
        &self,
        left: (usize, usize),
        right: (usize, usize),
    ) -> Result<(GridTensor, GridTensor, GridTensor)> {
        let r = RawTensor::random_long(left.0, left.1, self.modulus);
        let s = RawTensor::random_long(right.0, right.1, self.modulus);
        let t = r.matmul(&s)?.mod_scalar(Scalar::Int(self.modulus))?;
        Ok((self.share_field(&r)?, self.share_field(&s)?, self.share_field(&t)?))
    }

    /// Add a fresh sharing of zero, re-randomizing deterministic shares.
    fn remask(&self, x: &GridTensor) -> Result<GridTensor> {
        let (rows, cols) = x.share_shape()?;
        let u = RawTensor::random_long(rows, cols, self.modulus);
        let nu = u.neg().mod_scalar(Scalar::Int(self.modulus))?;
        let zero = self.distribute(u, nu, (rows, cols))?;
        let out = self.add(x, &zero)?;
        self.release_sharing(&zero)?;
        Ok(out)
    }

    // ---- plumbing ----------------------------------------------------------

    /// Validate the two-party share layout and return both references.
    fn share_refs(&self, t: &GridTensor) -> Result<(RemoteRef, RemoteRef)> {
        let shares = t.shares()?;
        if shares.len() != 2 {
            return Err(GridError::ProtocolViolation(format!(
                "expected a two-party sharing, found {} shares",
                shares.len()
            )));
        }
        let a = shares.get(&self.alice).ok_or_else(|| {
            GridError::ProtocolViolation(format!("no share held by '{}'", self.alice))
        })?;
        let b = shares.get(&self.bob).ok_or_else(|| {
            GridError::ProtocolViolation(format!("no share held by '{}'", self.bob))
        })?;
        Ok((a.clone(), b.clone()))
    }

    fn assemble(&self, a: RemoteRef, b: RemoteRef, shape: (usize, usize)) -> GridTensor {
        let mut shares = BTreeMap::new();
        shares.insert(self.alice.clone(), a);
        shares.insert(self.bob.clone(), b);
        GridTensor::shared(shares, shape, self.client.id())
    }

    /// Send a public raw tensor to both parties.
    fn broadcast(&self, raw: &RawTensor) -> Result<(RemoteRef, RemoteRef)> {
        let a = self.client.send_raw(raw.clone(), &self.alice)?;
        let b = self.client.send_raw(raw.clone(), &self.bob)?;
        Ok((a, b))
    }

    /// Run one remote tensor command against a share, without reduction.
    fn raw(&self, op: &str, receiver: &RemoteRef, arg: OpArg<'_>) -> Result<RemoteRef> {
        let recv = GridTensor::pointer(receiver.clone(), self.client.id());
        let result = match arg {
            OpArg::Int(v) => self.client.remote_op(op, &recv, &[CommandArg::Int(v)])?,
            OpArg::Ref(r) => {
                let operand = GridTensor::pointer(r.clone(), self.client.id());
                self.client
                    .remote_op(op, &recv, &[CommandArg::Tensor(&operand)])?
            }
        };
        Ok(result.remote()?.clone())
    }

    /// Run one remote tensor command and reduce the result into the field.
    /// The unreduced intermediate is released from the party registry.
    fn modded(&self, op: &str, receiver: &RemoteRef, arg: OpArg<'_>) -> Result<RemoteRef> {
        let unreduced = self.raw(op, receiver, arg)?;
        let reduced = self.raw("__mod__", &unreduced, OpArg::Int(self.modulus))?;
        self.release(&unreduced)?;
        Ok(reduced)
    }

    /// Release a consumed intermediate from its party registry.
    fn release(&self, r: &RemoteRef) -> Result<()> {
        self.client.release_remote(&r.location, r.id_at_location)
    }

    /// Release both shares of a consumed intermediate sharing.
    fn release_sharing(&self, t: &GridTensor) -> Result<()> {
        let (a, b) = self.share_refs(t)?;
        self.release(&a)?;
        self.release(&b)
    }
}
