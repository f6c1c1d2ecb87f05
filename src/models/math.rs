//! Row-major matrix helpers for flat buffers.

/// Multiply row-major `a` `[m, k]` by `b` `[k, n]` into `[m, n]`.
pub fn matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);

    let mut out = vec![0.0f32; m * n];
    for row in 0..m {
        for inner in 0..k {
            let a_val = a[row * k + inner];
            if a_val == 0.0 {
                continue; // spike trains are mostly zero
            }
            let b_row = &b[inner * n..(inner + 1) * n];
            let out_row = &mut out[row * n..(row + 1) * n];
            for (o, &b_val) in out_row.iter_mut().zip(b_row) {
                *o += a_val * b_val;
            }
        }
    }
    out
}

/// Transpose a row-major matrix `[rows, cols]` into `[cols, rows]`.
pub fn transpose(data: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    debug_assert_eq!(data.len(), rows * cols);
    let mut out = vec![0.0f32; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}
