//! WGSL compute shaders.
//!
//! Every shader reads a 16-byte uniform at binding 0, its inputs as read-only
//! storage buffers at the following bindings, and writes one read-write
//! storage buffer at the last binding. Entry point is always `main`.

/// Tiled matrix multiplication `C = A @ B`, `A: [M, K]`, `B: [K, N]`.
///
/// Workgroup size: [16, 16, 1]. Each workgroup stages one 16×16 tile of `A`
/// and of `B` in shared memory per step along `K`.
pub const MATMUL_SRC: &str = r"
struct Dims {
    m: u32,
    k: u32,
    n: u32,
    _pad: u32,
}

@group(0) @binding(0) var<uniform> dims: Dims;
@group(0) @binding(1) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read> b: array<f32>;
@group(0) @binding(3) var<storage, read_write> c: array<f32>;

const TILE: u32 = 16u;

var<workgroup> tile_a: array<f32, 256>;
var<workgroup> tile_b: array<f32, 256>;

@compute @workgroup_size(16, 16, 1)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let row = gid.y;
    let col = gid.x;
    let local_row = lid.y;
    let local_col = lid.x;

    var sum: f32 = 0.0;
    let num_tiles = (dims.k + TILE - 1u) / TILE;

    for (var t: u32 = 0u; t < num_tiles; t = t + 1u) {
        let a_col = t * TILE + local_col;
        if row < dims.m && a_col < dims.k {
            tile_a[local_row * TILE + local_col] = a[row * dims.k + a_col];
        } else {
            tile_a[local_row * TILE + local_col] = 0.0;
        }

        let b_row = t * TILE + local_row;
        if b_row < dims.k && col < dims.n {
            tile_b[local_row * TILE + local_col] = b[b_row * dims.n + col];
        } else {
            tile_b[local_row * TILE + local_col] = 0.0;
        }

        workgroupBarrier();

        for (var i: u32 = 0u; i < TILE; i = i + 1u) {
            sum = sum + tile_a[local_row * TILE + i] * tile_b[i * TILE + local_col];
        }

        workgroupBarrier();
    }

    if row < dims.m && col < dims.n {
        c[row * dims.n + col] = sum;
    }
}
";

/// Softmax over a single vector of `n` elements.
///
/// One workgroup of 256 threads: strided max-reduction, exp and
/// sum-reduction in shared memory, then normalization.
pub const SOFTMAX_SRC: &str = r"
struct Params {
    n: u32,
    scalar: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

const WG_SIZE: u32 = 256u;

var<workgroup> scratch: array<f32, 256>;

@compute @workgroup_size(256, 1, 1)
fn main(@builtin(local_invocation_id) lid: vec3<u32>) {
    let tid = lid.x;
    let n = params.n;

    var local_max: f32 = -3.402823466e+38;
    var i = tid;
    while i < n {
        local_max = max(local_max, input[i]);
        i = i + WG_SIZE;
    }
    scratch[tid] = local_max;
    workgroupBarrier();

    var stride: u32 = WG_SIZE / 2u;
    while stride > 0u {
        if tid < stride {
            scratch[tid] = max(scratch[tid], scratch[tid + stride]);
        }
        workgroupBarrier();
        stride = stride / 2u;
    }
    let row_max = scratch[0];
    workgroupBarrier();

    var local_sum: f32 = 0.0;
    i = tid;
    while i < n {
        let e = exp(input[i] - row_max);
        output[i] = e;
        local_sum = local_sum + e;
        i = i + WG_SIZE;
    }
    scratch[tid] = local_sum;
    workgroupBarrier();

    stride = WG_SIZE / 2u;
    while stride > 0u {
        if tid < stride {
            scratch[tid] = scratch[tid] + scratch[tid + stride];
        }
        workgroupBarrier();
        stride = stride / 2u;
    }
    let total = scratch[0];

    i = tid;
    while i < n {
        output[i] = output[i] / total;
        i = i + WG_SIZE;
    }
}
";

/// Element-wise `max(x, 0)`. Workgroup size: [256, 1, 1].
pub const RELU_SRC: &str = r"
struct Params {
    n: u32,
    scalar: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(256, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let idx = gid.x;
    if idx < params.n {
        output[idx] = max(0.0, input[idx]);
    }
}
";

/// Element-wise `a + b`. Workgroup size: [256, 1, 1].
pub const ADD_SRC: &str = r"
struct Params {
    n: u32,
    scalar: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read> b: array<f32>;
@group(0) @binding(3) var<storage, read_write> c: array<f32>;

@compute @workgroup_size(256, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let idx = gid.x;
    if idx < params.n {
        c[idx] = a[idx] + b[idx];
    }
}
";

/// Element-wise `x * scalar`. Workgroup size: [256, 1, 1].
pub const SCALE_SRC: &str = r"
struct Params {
    n: u32,
    scalar: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(256, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let idx = gid.x;
    if idx < params.n {
        output[idx] = input[idx] * params.scalar;
    }
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shaders_declare_main_entry_point() {
        for src in [MATMUL_SRC, SOFTMAX_SRC, RELU_SRC, ADD_SRC, SCALE_SRC] {
            assert!(src.contains("fn main("));
            assert!(src.contains("@binding(0) var<uniform>"));
        }
    }
}
