use crate::core::{MediaKind, PlayerError, Result, Track};
use crate::player::container::ContainerReader;
use log::{debug, warn};

/// 按容器顺序查找第一个匹配媒体类型的轨道
///
/// 没有匹配轨道时返回 None（不是错误）；调用方决定是否视为致命的建立错误。
pub fn select_track(reader: &dyn ContainerReader, kind: MediaKind) -> Option<usize> {
    for index in 0..reader.track_count() {
        match reader.track_format(index) {
            Ok(format) if kind.matches(&format.mime) => {
                debug!("选中{}轨道 #{} ({})", kind, index, format.mime);
                return Some(index);
            }
            Ok(_) => {}
            Err(e) => warn!("⚠️ 读取轨道 #{} 格式失败: {}", index, e),
        }
    }
    None
}

/// 查找并选中轨道，找不到时返回 `NoTrackFound`
pub fn open_track(reader: &mut dyn ContainerReader, kind: MediaKind) -> Result<Track> {
    let index = select_track(reader, kind).ok_or(PlayerError::NoTrackFound(kind))?;
    reader.select_track(index)?;
    let format = reader.track_format(index)?;
    Ok(Track { index, kind, format })
}
