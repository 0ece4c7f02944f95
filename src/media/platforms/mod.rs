mod bilibili;
mod douyin;
mod haokan;
mod kuaishou;
mod pear;
mod pipigaoxiao;
mod weishi;
mod xiaohongshu;

pub use bilibili::BilibiliResolver;
pub use douyin::DouyinResolver;
pub use haokan::HaokanResolver;
pub use kuaishou::KuaishouResolver;
pub use pear::PearResolver;
pub use pipigaoxiao::PipigaoxiaoResolver;
pub use weishi::WeishiResolver;
pub use xiaohongshu::XiaohongshuResolver;

use super::resolver::{Resolver, ResolverContext};
use super::types::PlatformId;
use crate::config::Config;

/// Built-in resolver for `platform`, patched with its config override.
pub fn build_resolver(
    platform: PlatformId,
    ctx: ResolverContext,
    config: &Config,
) -> Box<dyn Resolver> {
    let patch = config.platform_override(platform);
    match platform {
        PlatformId::Douyin => Box::new(DouyinResolver::new(ctx, patch)),
        PlatformId::Kuaishou => Box::new(KuaishouResolver::new(ctx, patch)),
        PlatformId::Bilibili => Box::new(BilibiliResolver::new(ctx, patch)),
        PlatformId::Xiaohongshu => Box::new(XiaohongshuResolver::new(ctx, patch)),
        PlatformId::Haokan => Box::new(HaokanResolver::new(ctx, patch)),
        PlatformId::Weishi => Box::new(WeishiResolver::new(ctx, patch)),
        PlatformId::Pear => Box::new(PearResolver::new(ctx, patch)),
        PlatformId::Pipigaoxiao => Box::new(PipigaoxiaoResolver::new(ctx, patch)),
    }
}
