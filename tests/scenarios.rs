//! End-to-end scenarios: plan a convolution, emit a `CodeBlob`, and check
//! the properties of the generated code an embedder can observe without a
//! full execute-and-compare harness (size is nonzero, no panics escape a
//! legal `ConvConf`, bias/ReLU toggles change what gets emitted).

use jitconv::conf::{plan, Direction};
use jitconv::desc::{ActivationDesc, BiasDesc, ConvDesc, FwdOptions, Padding, WeightsDesc};
use jitconv::format::{ActivationFormat, WeightsFormat};

fn init() {
    let _ = env_logger::try_init();
}

/// AlexNet conv1: the flat (`ic == 3`) forward path, no padding.
#[test]
fn alexnet_conv1_forward_emits_code() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 0, l: 0 },
        stride_h: 4,
        stride_w: 4,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 3, h: 227, w: 227, format: ActivationFormat::Nchw };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 3,
        oc: 96,
        kh: 11,
        kw: 11,
        format: WeightsFormat::Ohwi8o,
    };
    let dst = ActivationDesc { mb: 1, c: 96, h: 55, w: 55, format: ActivationFormat::NChw8c };

    let conf = plan(Direction::Forward, &cd, &src, &weights, &dst, FwdOptions::default())
        .expect("AlexNet conv1 is within the supported template");
    let blob = jitconv::emit::emit(&conf);
    assert!(!blob.is_empty());
    assert!(blob.len() > 16, "a real kernel is more than a bare prologue/epilogue");
}

/// AlexNet conv2: blocked format, symmetric padding, ReLU epilogue.
#[test]
fn alexnet_conv2_forward_with_relu_emits_code() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 2, l: 2 },
        stride_h: 1,
        stride_w: 1,
        bias: BiasDesc { present: true },
    };
    let src = ActivationDesc { mb: 1, c: 96, h: 27, w: 27, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 96,
        oc: 256,
        kh: 5,
        kw: 5,
        format: WeightsFormat::OIhw8i8o,
    };
    let dst = ActivationDesc { mb: 1, c: 256, h: 27, w: 27, format: ActivationFormat::NChw8c };
    let fwd_opts = FwdOptions { with_relu: true, relu_negative_slope: 0.0 };

    let conf = plan(Direction::Forward, &cd, &src, &weights, &dst, fwd_opts)
        .expect("AlexNet conv2 is within the supported template");
    assert!(conf.with_bias);
    assert!(conf.with_relu);
    let blob = jitconv::emit::emit(&conf);
    assert!(!blob.is_empty());
}

/// Leaky ReLU is accepted by the descriptor type but rejected by the
/// planner: the emitter only ever generates plain ReLU.
#[test]
fn leaky_relu_is_rejected_at_plan_time() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 2, l: 2 },
        stride_h: 1,
        stride_w: 1,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 96, h: 27, w: 27, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 96,
        oc: 256,
        kh: 5,
        kw: 5,
        format: WeightsFormat::OIhw8i8o,
    };
    let dst = ActivationDesc { mb: 1, c: 256, h: 27, w: 27, format: ActivationFormat::NChw8c };
    let fwd_opts = FwdOptions { with_relu: true, relu_negative_slope: 0.01 };

    let result = plan(Direction::Forward, &cd, &src, &weights, &dst, fwd_opts);
    assert!(result.is_err());
}

/// Pointwise 1x1 backward-data: the `nb_ic_blocking = 3` specialisation.
#[test]
fn pointwise_backward_data_emits_code() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 0, l: 0 },
        stride_h: 1,
        stride_w: 1,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 256, h: 13, w: 13, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 256,
        oc: 256,
        kh: 1,
        kw: 1,
        format: WeightsFormat::OIhw8o8i,
    };
    let dst = ActivationDesc { mb: 1, c: 256, h: 13, w: 13, format: ActivationFormat::NChw8c };

    let conf = plan(Direction::BackwardData, &cd, &src, &weights, &dst, FwdOptions::default())
        .expect("pointwise 1x1 backward-data is within the supported template");
    assert_eq!(conf.nb_ic_blocking, 3);
    let blob = jitconv::emit::emit(&conf);
    assert!(!blob.is_empty());
}

/// Strided backward-data is out of the supported template.
#[test]
fn strided_backward_data_is_rejected() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 1, l: 1 },
        stride_h: 2,
        stride_w: 2,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 64, h: 56, w: 56, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 64,
        oc: 64,
        kh: 3,
        kw: 3,
        format: WeightsFormat::OIhw8o8i,
    };
    let dst = ActivationDesc { mb: 1, c: 64, h: 28, w: 28, format: ActivationFormat::NChw8c };

    let result = plan(Direction::BackwardData, &cd, &src, &weights, &dst, FwdOptions::default());
    assert!(result.is_err());
}

/// Backward-weights always takes the blocked (`ic % 8 == 0`) path, even for
/// an otherwise-AlexNet-conv1-shaped problem: `kw = 11` selects
/// `ic_block_step = 1` and `ow = 55 <= max_ur_w` selects the fully-unrolled
/// row microkernel.
#[test]
fn backward_weights_11x11_emits_code() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 0, l: 0 },
        stride_h: 4,
        stride_w: 4,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 8, h: 227, w: 227, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 8,
        oc: 96,
        kh: 11,
        kw: 11,
        format: WeightsFormat::OIhw8i8o,
    };
    let dst = ActivationDesc { mb: 1, c: 96, h: 55, w: 55, format: ActivationFormat::NChw8c };

    let conf = plan(Direction::BackwardWeights, &cd, &src, &weights, &dst, FwdOptions::default())
        .expect("backward-weights 11x11 is within the supported template");
    assert_eq!(conf.ic_block_step, 1);
    assert_eq!(conf.max_ur_w, 28);
    let blob = jitconv::emit::emit(&conf);
    assert!(!blob.is_empty());
}

/// VGG-style 3x3, stride 1, pad 1: tiled middle loop plus a tail.
#[test]
fn vgg_3x3_forward_emits_code() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 1, l: 1 },
        stride_h: 1,
        stride_w: 1,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 64, h: 56, w: 56, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 64,
        oc: 64,
        kh: 3,
        kw: 3,
        format: WeightsFormat::OIhw8i8o,
    };
    let dst = ActivationDesc { mb: 1, c: 64, h: 56, w: 56, format: ActivationFormat::NChw8c };

    let conf = plan(Direction::Forward, &cd, &src, &weights, &dst, FwdOptions::default())
        .expect("VGG 3x3 is within the supported template");
    assert_eq!(conf.ur_w, 3);
    assert_eq!(conf.ur_w_tail, 2);
    let blob = jitconv::emit::emit(&conf);
    assert!(!blob.is_empty());
}

/// `kw >= 14` is rejected for backward-weights; emission is never reached.
#[test]
fn wide_kernel_backward_weights_rejected() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 0, l: 0 },
        stride_h: 1,
        stride_w: 1,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 64, h: 32, w: 32, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 64,
        oc: 64,
        kh: 14,
        kw: 14,
        format: WeightsFormat::OIhw8i8o,
    };
    let dst = ActivationDesc { mb: 1, c: 64, h: 19, w: 19, format: ActivationFormat::NChw8c };

    let result = plan(Direction::BackwardWeights, &cd, &src, &weights, &dst, FwdOptions::default());
    assert!(result.is_err());
}

/// Two emissions of the same plan produce byte-identical code: emission is
/// a pure function of `ConvConf`, matching §5's "no shared mutable state."
#[test]
fn emission_is_deterministic() {
    init();
    let cd = ConvDesc {
        padding: Padding { t: 1, l: 1 },
        stride_h: 1,
        stride_w: 1,
        bias: BiasDesc { present: false },
    };
    let src = ActivationDesc { mb: 1, c: 64, h: 56, w: 56, format: ActivationFormat::NChw8c };
    let weights = WeightsDesc {
        with_groups: false,
        g: 1,
        ic: 64,
        oc: 64,
        kh: 3,
        kw: 3,
        format: WeightsFormat::OIhw8i8o,
    };
    let dst = ActivationDesc { mb: 1, c: 64, h: 56, w: 56, format: ActivationFormat::NChw8c };

    let conf = plan(Direction::Forward, &cd, &src, &weights, &dst, FwdOptions::default()).unwrap();
    let a = jitconv::emit::emit(&conf);
    let b = jitconv::emit::emit(&conf);
    assert_eq!(a.code(), b.code());
}
